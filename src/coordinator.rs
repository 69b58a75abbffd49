//! Composition root tying the mirror, phase machine, subscription layer,
//! action submitter, and reconnect supervisor into one game client.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::transport::TransportError;
use crate::backend::{RealtimeTransport, RpcTransport, ScopeKey};
use crate::config::ClientConfig;
use crate::dto::events::ServerChange;
use crate::dto::render::RenderSnapshot;
use crate::dto::snapshot::SessionSnapshot;
use crate::error::{ActionError, ClientError};
use crate::services::actions::ActionService;
use crate::services::countdown::Countdown;
use crate::services::reconnect::{
    ConnectionNotifier, ConnectionState, Connector, ReconnectManager,
};
use crate::services::subscription::{ChannelStatus, ScopedChange, SubscriptionService};
use crate::state::phase_machine::{CluePhase, GamePhase, PhaseEvent};
use crate::state::{ClientState, SharedState};

/// Client-side coordinator for one multiplayer game session.
///
/// Owns the shared state and the background tasks; the embedding application
/// constructs it with explicit transports, calls [`Coordinator::connect`],
/// feeds it UI intents, and watches [`Coordinator::render_watcher`] for
/// re-render triggers.
pub struct Coordinator {
    state: SharedState,
    actions: Arc<ActionService>,
    subscriptions: Arc<SubscriptionService>,
    reconnect: ReconnectManager,
    loop_task: JoinHandle<()>,
}

impl Coordinator {
    /// Assemble a coordinator from its transports and configuration.
    ///
    /// Nothing connects until [`Coordinator::connect`] is called; lifecycle
    /// is owned by the caller, not by module globals.
    pub fn new(
        rpc: Arc<dyn RpcTransport>,
        realtime: Arc<dyn RealtimeTransport>,
        config: ClientConfig,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Self {
        let state = ClientState::new(user_id);
        let subscriptions = Arc::new(SubscriptionService::new(realtime));
        let actions = Arc::new(ActionService::new(
            rpc,
            state.clone(),
            session_id,
            config.min_wager,
            config.board_max_clue_value,
        ));

        let (change_tx, change_rx) = mpsc::unbounded_channel();

        let connector = Arc::new(ResyncConnector {
            state: state.clone(),
            actions: actions.clone(),
            subscriptions: subscriptions.clone(),
            change_tx: change_tx.clone(),
            session_id,
        });
        let reconnect = ReconnectManager::spawn(config.backoff, connector);

        let event_loop = EventLoop {
            state: state.clone(),
            actions: actions.clone(),
            subscriptions: subscriptions.clone(),
            change_tx,
            session_id,
            final_round_duration: config.final_round_duration,
            countdown: None,
        };
        let status_rx = subscriptions.status_watcher();
        let notifier = reconnect.notifier();
        let loop_task = tokio::spawn(event_loop.run(change_rx, status_rx, notifier));

        Self {
            state,
            actions,
            subscriptions,
            reconnect,
            loop_task,
        }
    }

    /// Connect: fetch the authoritative snapshot, derive the phase from it,
    /// and open the change feed. Blocks until connected or until retries are
    /// exhausted.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.reconnect.connect();
        let mut watcher = self.reconnect.watcher();
        loop {
            match *watcher.borrow_and_update() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Error => return Err(ClientError::ConnectFailed),
                _ => {}
            }
            if watcher.changed().await.is_err() {
                return Err(ClientError::ConnectFailed);
            }
        }
    }

    /// Tear everything down; no reconnect fires afterwards.
    pub async fn dispose(self) {
        self.reconnect.disconnect();
        let mut watcher = self.reconnect.watcher();
        while *watcher.borrow_and_update() != ConnectionState::Disconnected {
            if watcher.changed().await.is_err() {
                break;
            }
        }
        self.reconnect.shutdown().await;
        self.loop_task.abort();
        self.subscriptions.unsubscribe().await;
    }

    /// Subscribe to render snapshots published on every state change.
    pub fn render_watcher(&self) -> watch::Receiver<RenderSnapshot> {
        self.state.render_watcher()
    }

    /// Subscribe to the connection status (the UI's "Reconnecting…" badge).
    pub fn connection_watcher(&self) -> watch::Receiver<ConnectionState> {
        self.reconnect.watcher()
    }

    /// The shared client state, for direct reads.
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Current phase.
    pub async fn phase(&self) -> GamePhase {
        self.state.phase().await
    }

    /// Reveal a clue as the turn holder.
    pub async fn select_clue(&self, clue_id: Uuid) -> Result<(), ActionError> {
        self.actions.select_clue(clue_id).await
    }

    /// Press the buzzer; returns the assigned rank.
    pub async fn buzz(&self) -> Result<u32, ActionError> {
        self.actions.buzz().await
    }

    /// Submit an answer for judging.
    pub async fn submit_answer(&self, text: Option<String>) -> Result<(), ActionError> {
        self.actions.submit_answer(text).await
    }

    /// Lock in a daily-double or final-round wager.
    pub async fn submit_wager(&self, amount: i64) -> Result<(), ActionError> {
        self.actions.submit_wager(amount).await
    }

    /// Abandon the live clue.
    pub async fn skip_clue(&self) -> Result<(), ActionError> {
        self.actions.skip_clue().await
    }
}

/// The connect/disconnect pair driven by the reconnect supervisor.
struct ResyncConnector {
    state: SharedState,
    actions: Arc<ActionService>,
    subscriptions: Arc<SubscriptionService>,
    change_tx: mpsc::UnboundedSender<ScopedChange>,
    session_id: Uuid,
}

impl Connector for ResyncConnector {
    fn establish(&self) -> BoxFuture<'static, Result<(), TransportError>> {
        let state = self.state.clone();
        let actions = self.actions.clone();
        let subscriptions = self.subscriptions.clone();
        let change_tx = self.change_tx.clone();
        let session_id = self.session_id;
        Box::pin(async move {
            resync(&state, &actions, &subscriptions, &change_tx, session_id).await
        })
    }

    fn teardown(&self) -> BoxFuture<'static, ()> {
        let subscriptions = self.subscriptions.clone();
        Box::pin(async move {
            subscriptions.unsubscribe().await;
        })
    }
}

/// Full resynchronization: open the feed for the session's current scope and
/// rebuild all local state from a fresh authoritative snapshot.
///
/// The feed opens before the snapshot is fetched so no change falls into the
/// gap; anything the feed redelivers from before the snapshot is dropped by
/// the mirror's sequence check. Phase is re-derived from the snapshot, never
/// resumed from the pre-outage value.
async fn resync(
    state: &SharedState,
    actions: &ActionService,
    subscriptions: &SubscriptionService,
    change_tx: &mpsc::UnboundedSender<ScopedChange>,
    session_id: Uuid,
) -> Result<(), TransportError> {
    let mut snapshot = fetch_snapshot(actions).await?;

    for _ in 0..3 {
        let scope = scope_for(&snapshot, session_id);
        subscriptions
            .subscribe(scope.clone(), change_tx.clone())
            .await?;

        snapshot = fetch_snapshot(actions).await?;
        if scope_for(&snapshot, session_id) == scope {
            state
                .with_mirror(|mirror| mirror.apply_snapshot(&snapshot))
                .await;
            let phase = state.read_mirror(|mirror| mirror.derive_phase()).await;
            state.resync_phase(phase).await;
            state.publish_render().await;
            return Ok(());
        }
        // The live clue moved between the two fetches; follow it.
    }

    Err(TransportError::ChannelClosed(
        "session scope kept moving during resync".into(),
    ))
}

async fn fetch_snapshot(actions: &ActionService) -> Result<SessionSnapshot, TransportError> {
    actions.fetch_snapshot().await.map_err(|err| match err {
        ActionError::Transport(transport) => transport,
        other => TransportError::MalformedResponse(other.to_string()),
    })
}

fn scope_for(snapshot: &SessionSnapshot, session_id: Uuid) -> ScopeKey {
    match snapshot.current_clue {
        Some(clue_id) => ScopeKey::clue(session_id, clue_id),
        None => ScopeKey::session(session_id),
    }
}

/// Single consumer of the change queue.
///
/// All mirror and phase mutation funnels through this task in arrival order;
/// handlers never re-enter each other because follow-up work is queued, not
/// recursed into.
struct EventLoop {
    state: SharedState,
    actions: Arc<ActionService>,
    subscriptions: Arc<SubscriptionService>,
    change_tx: mpsc::UnboundedSender<ScopedChange>,
    session_id: Uuid,
    final_round_duration: Duration,
    countdown: Option<Countdown>,
}

impl EventLoop {
    async fn run(
        mut self,
        mut changes: mpsc::UnboundedReceiver<ScopedChange>,
        mut status: watch::Receiver<ChannelStatus>,
        notifier: ConnectionNotifier,
    ) {
        loop {
            tokio::select! {
                maybe = changes.recv() => match maybe {
                    Some(scoped) => {
                        self.handle(scoped).await;
                        self.state.publish_render().await;
                    }
                    None => break,
                },
                changed = status.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let ChannelStatus::Lost(scope) = &*status.borrow_and_update() {
                        warn!(scope = %scope, "change feed dropped");
                        notifier.connection_lost();
                    }
                }
            }
        }
    }

    async fn handle(&mut self, scoped: ScopedChange) {
        // A change from a scope that is no longer current is a leftover from
        // before a switch and must not touch the new scope's state.
        match self.subscriptions.current_scope().await {
            Some(current) if current == scoped.scope => {}
            current => {
                debug!(
                    arrived = %scoped.scope,
                    current = ?current.map(|scope| scope.to_string()),
                    "dropping change from a stale scope"
                );
                return;
            }
        }

        match scoped.change {
            ServerChange::SessionReplaced { ref session, .. } => {
                self.state
                    .with_mirror(|mirror| mirror.apply_snapshot(session))
                    .await;
                let phase = self.state.read_mirror(|mirror| mirror.derive_phase()).await;
                self.state.resync_phase(phase).await;
            }
            ServerChange::ClueRevealed {
                clue_id,
                selected_by,
                daily_double,
                ..
            } => {
                self.apply_mirror(&scoped.change).await;
                self.try_apply(PhaseEvent::ClueSelected {
                    player: selected_by,
                    daily_double,
                })
                .await;
                self.switch_scope(ScopeKey::clue(self.session_id, clue_id))
                    .await;
            }
            ServerChange::BuzzRecorded { .. } => {
                if self.apply_mirror(&scoped.change).await {
                    self.promote_next_buzzer().await;
                }
            }
            ServerChange::BuzzersCleared { .. } => {
                self.apply_mirror(&scoped.change).await;
                self.try_apply(PhaseEvent::BuzzersCleared).await;
            }
            ServerChange::AnswerJudged {
                player_id,
                correct,
                rebuzz,
                ..
            } => {
                self.try_apply(PhaseEvent::AnswerJudged {
                    player: player_id,
                    correct,
                })
                .await;
                self.apply_mirror(&scoped.change).await;
                if !correct && rebuzz {
                    self.try_apply(PhaseEvent::RebuzzOpened).await;
                    self.promote_next_buzzer().await;
                }
            }
            ServerChange::WagerLocked { player_id, .. } => {
                self.apply_mirror(&scoped.change).await;
                if let GamePhase::Clue(CluePhase::Wagering { player }) = self.state.phase().await {
                    if player == player_id {
                        self.try_apply(PhaseEvent::WagerLocked).await;
                    }
                }
            }
            ServerChange::ScoreUpdated { .. } | ServerChange::TurnChanged { .. } => {
                self.apply_mirror(&scoped.change).await;
            }
            ServerChange::ClueClosed { .. } => {
                let event = match self.state.phase().await {
                    GamePhase::Clue(CluePhase::BuzzersOpen { .. }) => Some(PhaseEvent::ClueSkipped),
                    GamePhase::Clue(_) => Some(PhaseEvent::ClueFinished),
                    _ => None,
                };
                self.apply_mirror(&scoped.change).await;
                if let Some(event) = event {
                    self.try_apply(event).await;
                }
                self.switch_scope(ScopeKey::session(self.session_id)).await;
            }
            ServerChange::BoardCompleted { .. } => {
                self.apply_mirror(&scoped.change).await;
                self.try_apply(PhaseEvent::BoardCompleted).await;
            }
            ServerChange::FinalWagersLocked { .. } => {
                self.apply_mirror(&scoped.change).await;
                self.try_apply(PhaseEvent::FinalWagersLocked).await;
                self.start_final_countdown();
            }
            ServerChange::FinalResults { .. } => {
                self.apply_mirror(&scoped.change).await;
                if let Some(countdown) = self.countdown.take() {
                    countdown.cancel();
                }
                self.try_apply(PhaseEvent::FinalScored).await;
            }
            ServerChange::Unknown => {}
        }
    }

    async fn apply_mirror(&self, change: &ServerChange) -> bool {
        self.state
            .with_mirror(|mirror| mirror.apply_change(change))
            .await
    }

    /// Apply a server-confirmed phase event, tolerating transitions the
    /// optimistic acknowledgement path already performed.
    async fn try_apply(&self, event: PhaseEvent) {
        if let Err(err) = self.state.apply_event(event.clone()).await {
            debug!(event = ?event, error = %err, "phase event not applicable");
        }
    }

    /// With the buzzers open, hand the floor to the lowest-ranked press that
    /// is not locked out.
    async fn promote_next_buzzer(&self) {
        if !matches!(
            self.state.phase().await,
            GamePhase::Clue(CluePhase::BuzzersOpen { .. })
        ) {
            return;
        }
        let next = self
            .state
            .read_mirror(|mirror| {
                mirror
                    .next_eligible_press()
                    .map(|press| (press.player_id, press.rank))
            })
            .await;
        if let Some((player, rank)) = next {
            self.try_apply(PhaseEvent::BuzzAccepted { player, rank }).await;
        }
    }

    /// Move the change feed to a new scope and rebuild state across the gap.
    async fn switch_scope(&self, scope: ScopeKey) {
        if self.subscriptions.current_scope().await.as_ref() == Some(&scope) {
            return;
        }
        if let Err(err) = resync(
            &self.state,
            &self.actions,
            &self.subscriptions,
            &self.change_tx,
            self.session_id,
        )
        .await
        {
            // Leave recovery to the reconnect supervisor via the status feed.
            warn!(scope = %scope, error = %err, "scope switch failed");
        }
    }

    /// Arm the one-shot final-round timer; expiry forces a timed-out
    /// non-answer unless this client already submitted.
    fn start_final_countdown(&mut self) {
        let actions = self.actions.clone();
        let countdown = Countdown::start(self.final_round_duration, move || async move {
            match actions.submit_answer(None).await {
                Ok(()) => debug!("final round timed out; empty answer recorded"),
                Err(ActionError::AlreadySubmitted) => {}
                Err(err) => warn!(error = %err, "timed-out final answer failed"),
            }
        });
        self.countdown = Some(countdown);
    }
}
