pub mod mirror;
pub mod phase_machine;
pub mod session;

use std::{sync::Arc, time::Duration};

use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tracing::warn;
use uuid::Uuid;

use crate::dto::phase::PhaseKind;
use crate::dto::render::{ClueView, PressLine, RenderSnapshot, ScoreLine};
use crate::error::ActionError;
use crate::state::mirror::SessionMirror;
use crate::state::phase_machine::{CluePhase, GamePhase, PhaseMachine, PhaseSnapshot, Plan, PlanId};

pub use self::phase_machine::{AbortError, ApplyError, PhaseEvent, PlanError};

/// Shared handle to the client's state root.
pub type SharedState = Arc<ClientState>;

/// Default limit for the work step of a phase transition.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Central client state: the session mirror, the phase machine, and the
/// render feed the UI watches.
///
/// The only mutable shared resource on the client. The coordinator's event
/// loop and submission acknowledgements mutate it; the UI and guards read it.
pub struct ClientState {
    my_user: Uuid,
    phase: RwLock<PhaseMachine>,
    mirror: RwLock<SessionMirror>,
    render: watch::Sender<RenderSnapshot>,
    transition_gate: Mutex<()>,
    transition_timeout: Option<Duration>,
}

impl ClientState {
    /// Construct a new [`ClientState`] wrapped in an [`Arc`].
    pub fn new(my_user: Uuid) -> SharedState {
        let (render_tx, _rx) = watch::channel(RenderSnapshot::default());
        Arc::new(Self {
            my_user,
            phase: RwLock::new(PhaseMachine::new()),
            mirror: RwLock::new(SessionMirror::new(my_user)),
            render: render_tx,
            transition_gate: Mutex::new(()),
            transition_timeout: Some(DEFAULT_TRANSITION_TIMEOUT),
        })
    }

    /// The local authenticated user.
    pub fn my_user(&self) -> Uuid {
        self.my_user
    }

    /// Snapshot the current phase.
    pub async fn phase(&self) -> GamePhase {
        self.phase.read().await.phase()
    }

    /// Snapshot the phase machine, including any pending transition.
    pub async fn phase_snapshot(&self) -> PhaseSnapshot {
        self.phase.read().await.snapshot()
    }

    /// Subscribe to render snapshots; a new value is published on every state
    /// change.
    pub fn render_watcher(&self) -> watch::Receiver<RenderSnapshot> {
        self.render.subscribe()
    }

    /// Read the mirror under its lock.
    pub async fn read_mirror<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&SessionMirror) -> T,
    {
        let guard = self.mirror.read().await;
        f(&guard)
    }

    /// Mutate the mirror under its lock.
    pub async fn with_mirror<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut SessionMirror) -> T,
    {
        let mut guard = self.mirror.write().await;
        f(&mut guard)
    }

    /// Replace the phase with one re-derived from fresh authoritative state.
    pub async fn resync_phase(&self, phase: GamePhase) {
        let mut sm = self.phase.write().await;
        sm.resync(phase);
    }

    /// Plan a transition on the shared phase machine.
    async fn plan_transition(&self, event: PhaseEvent) -> Result<Plan, PlanError> {
        let mut sm = self.phase.write().await;
        sm.plan(event)
    }

    /// Apply the planned transition, returning the next phase.
    async fn apply_planned_transition(&self, plan_id: PlanId) -> Result<GamePhase, ApplyError> {
        let mut sm = self.phase.write().await;
        sm.apply(plan_id)
    }

    /// Abort a planned transition.
    async fn abort_transition(&self, plan_id: PlanId) -> Result<(), AbortError> {
        let mut sm = self.phase.write().await;
        sm.abort(plan_id)
    }

    /// Run `work` between planning and applying a phase transition.
    ///
    /// The transition is applied only when `work` succeeds; a failure or a
    /// timeout aborts the plan and leaves the phase untouched, so a rejected
    /// submission never advances the phase.
    pub async fn run_transition<F, Fut, T>(
        &self,
        event: PhaseEvent,
        work: F,
    ) -> Result<(T, GamePhase), ActionError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ActionError>>,
    {
        let gate = self.transition_gate.lock().await;
        let Plan { id: plan_id, .. } = self.plan_transition(event.clone()).await?;

        let work_future = work();
        let outcome = if let Some(limit) = self.transition_timeout {
            match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(abort_err) = self.abort_transition(plan_id).await {
                        warn!(
                            event = ?event,
                            plan_id = %plan_id,
                            error = ?abort_err,
                            "failed to abort transition after timeout"
                        );
                    }
                    drop(gate);
                    return Err(ActionError::Timeout);
                }
            }
        } else {
            work_future.await
        };

        match outcome {
            Ok(value) => {
                let next = self.apply_planned_transition(plan_id).await?;
                drop(gate);
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_transition(plan_id).await {
                    warn!(
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }

    /// Apply a server-confirmed event with no associated work.
    pub async fn apply_event(&self, event: PhaseEvent) -> Result<GamePhase, ActionError> {
        let ((), next) = self.run_transition(event, || async { Ok(()) }).await?;
        Ok(next)
    }

    /// Publish a fresh render snapshot to UI watchers.
    pub async fn publish_render(&self) {
        let phase = self.phase().await;
        let snapshot = self.build_render(&phase).await;
        let _ = self.render.send(snapshot);
    }

    async fn build_render(&self, phase: &GamePhase) -> RenderSnapshot {
        let mirror = self.mirror.read().await;
        let answering_player = match phase {
            GamePhase::Clue(CluePhase::Answering { player, .. }) => Some(*player),
            _ => None,
        };

        let scoreboard = mirror
            .session()
            .map(|session| {
                session
                    .participants
                    .values()
                    .map(|participant| ScoreLine {
                        player_id: participant.user_id,
                        display_name: participant.display_name.clone(),
                        score: participant.score,
                        is_me: participant.user_id == self.my_user,
                    })
                    .collect()
            })
            .unwrap_or_default();

        let presses = mirror
            .presses()
            .iter()
            .map(|press| PressLine {
                player_id: press.player_id,
                rank: press.rank,
            })
            .collect();

        let current_clue = mirror.current_clue().map(|clue| ClueView {
            id: clue.id,
            category: clue.category.clone(),
            value: clue.value,
            prompt: clue.prompt.clone(),
            daily_double: clue.daily_double,
        });

        RenderSnapshot {
            phase: PhaseKind::from(phase),
            answering_player,
            scoreboard,
            presses,
            current_clue,
            my_rank: mirror.my_rank(),
            answer_submitted: mirror.answer_submitted(),
            wager_submitted: mirror.wager_submitted(),
            turn_is_mine: mirror.turn_player() == Some(self.my_user),
        }
    }
}
