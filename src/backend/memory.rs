//! In-process backend implementing the full procedure and change-feed
//! contract against a single-writer model. Backs the demo binary and the
//! integration tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use futures::StreamExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;
use uuid::Uuid;

use crate::backend::transport::TransportResult;
use crate::backend::{EventStream, RawEvent, RealtimeTransport, RpcEnvelope, RpcTransport, ScopeKey};
use crate::dto::actions::{
    AnswerPayload, BuzzAck, BuzzPayload, PROC_FETCH_SNAPSHOT, PROC_RECORD_BUZZ, PROC_SELECT_CLUE,
    PROC_SKIP_CLUE, PROC_SUBMIT_ANSWER, PROC_SUBMIT_WAGER, SelectCluePayload, SkipCluePayload,
    SnapshotRequest, WagerPayload,
};
use crate::dto::events::ServerChange;
use crate::dto::snapshot::{BuzzSnapshot, ClueSnapshot, FinalStanding, ParticipantSnapshot, SessionSnapshot};
use crate::state::session::{ClueState, GameKind, SessionStatus, Wager};

/// Seed data for one clue hosted by the in-process backend.
#[derive(Debug, Clone)]
pub struct ClueSeed {
    /// Clue identifier.
    pub id: Uuid,
    /// Category label.
    pub category: String,
    /// Point value.
    pub value: i64,
    /// Prompt text shown on reveal.
    pub prompt: String,
    /// Correct answer, judged case-insensitively.
    pub answer: String,
    /// Whether the clue is a daily double.
    pub daily_double: bool,
    /// Whether the clue is the final-round clue. Seed exactly one.
    pub final_round: bool,
}

/// Seed data for one hosted session.
#[derive(Debug, Clone)]
pub struct SessionSeed {
    /// Session identifier.
    pub session_id: Uuid,
    /// Players as `(user id, display name)` in join order.
    pub participants: Vec<(Uuid, String)>,
    /// Board clues; include one `final_round` clue for a full game.
    pub clues: Vec<ClueSeed>,
    /// Player who picks the first clue.
    pub turn_player: Uuid,
    /// Smallest daily-double wager accepted.
    pub min_wager: i64,
    /// Ceiling a low-score player may still wager up to on a daily double.
    pub board_max_clue_value: i64,
}

struct HostClue {
    id: Uuid,
    category: String,
    value: i64,
    prompt: String,
    state: ClueState,
    daily_double: bool,
    final_round: bool,
    selected_by: Option<Uuid>,
    answer: String,
}

struct HostPlayer {
    user_id: Uuid,
    display_name: String,
    score: i64,
}

struct HostPress {
    player_id: Uuid,
    rank: u32,
    pressed_at: OffsetDateTime,
}

struct ServerModel {
    session_id: Uuid,
    status: SessionStatus,
    turn_player: Option<Uuid>,
    participants: IndexMap<Uuid, HostPlayer>,
    board: IndexMap<Uuid, HostClue>,
    current_clue: Option<Uuid>,
    next_rank: u32,
    presses: Vec<HostPress>,
    answered_wrong: Vec<Uuid>,
    clue_wagers: IndexMap<Uuid, Wager>,
    final_wagers: IndexMap<Uuid, Wager>,
    final_answers: IndexMap<Uuid, Option<String>>,
    min_wager: i64,
    board_max_clue_value: i64,
}

/// Backend running entirely in-process.
///
/// All mutation happens inside one mutex, so buzzer ranks are issued
/// strictly in arrival order, wager bounds are checked against the score the
/// mutation sees, and no two procedures ever interleave.
pub struct MemoryBackend {
    model: Arc<Mutex<ServerModel>>,
    hub: Arc<DashMap<String, broadcast::Sender<RawEvent>>>,
    seq: Arc<AtomicU64>,
}

impl MemoryBackend {
    /// Host a session from seed data.
    pub fn new(seed: SessionSeed) -> Self {
        let participants = seed
            .participants
            .into_iter()
            .map(|(user_id, display_name)| {
                (
                    user_id,
                    HostPlayer {
                        user_id,
                        display_name,
                        score: 0,
                    },
                )
            })
            .collect();
        let board = seed
            .clues
            .into_iter()
            .map(|clue| {
                (
                    clue.id,
                    HostClue {
                        id: clue.id,
                        category: clue.category,
                        value: clue.value,
                        prompt: clue.prompt,
                        state: ClueState::Hidden,
                        daily_double: clue.daily_double,
                        final_round: clue.final_round,
                        selected_by: None,
                        answer: clue.answer,
                    },
                )
            })
            .collect();

        Self {
            model: Arc::new(Mutex::new(ServerModel {
                session_id: seed.session_id,
                status: SessionStatus::Active,
                turn_player: Some(seed.turn_player),
                participants,
                board,
                current_clue: None,
                next_rank: 1,
                presses: Vec::new(),
                answered_wrong: Vec::new(),
                clue_wagers: IndexMap::new(),
                final_wagers: IndexMap::new(),
                final_answers: IndexMap::new(),
                min_wager: seed.min_wager,
                board_max_clue_value: seed.board_max_clue_value,
            })),
            hub: Arc::new(DashMap::new()),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl RpcTransport for MemoryBackend {
    fn call(
        &self,
        procedure: &str,
        params: serde_json::Value,
    ) -> BoxFuture<'static, TransportResult<RpcEnvelope>> {
        let model = self.model.clone();
        let hub = self.hub.clone();
        let seq = self.seq.clone();
        let procedure = procedure.to_string();
        Box::pin(async move {
            let mut guard = model.lock().unwrap_or_else(PoisonError::into_inner);
            let emitter = Emitter { hub: &hub, seq: &seq };
            Ok(dispatch(&mut guard, &emitter, &procedure, params))
        })
    }
}

impl RealtimeTransport for MemoryBackend {
    fn open(&self, scope: &ScopeKey) -> BoxFuture<'static, TransportResult<EventStream>> {
        let receiver = self
            .hub
            .entry(scope.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe();
        Box::pin(async move {
            let stream = BroadcastStream::new(receiver)
                .filter_map(|result| async move { result.ok() })
                .boxed();
            Ok(stream)
        })
    }
}

struct Emitter<'a> {
    hub: &'a DashMap<String, broadcast::Sender<RawEvent>>,
    seq: &'a AtomicU64,
}

impl Emitter<'_> {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn current_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    fn emit(&self, scope: &ScopeKey, change: &ServerChange) {
        let payload = match serde_json::to_string(change) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize change event");
                return;
            }
        };
        let scope = scope.to_string();
        let sender = self
            .hub
            .entry(scope.clone())
            .or_insert_with(|| broadcast::channel(64).0);
        let _ = sender.send(RawEvent { scope, payload });
    }
}

fn accepted(value: Option<serde_json::Value>) -> RpcEnvelope {
    RpcEnvelope {
        success: true,
        value,
        error: None,
    }
}

fn rejected(reason: &str) -> RpcEnvelope {
    RpcEnvelope {
        success: false,
        value: None,
        error: Some(reason.into()),
    }
}

fn dispatch(
    model: &mut ServerModel,
    emitter: &Emitter<'_>,
    procedure: &str,
    params: serde_json::Value,
) -> RpcEnvelope {
    match procedure {
        PROC_FETCH_SNAPSHOT => match serde_json::from_value::<SnapshotRequest>(params) {
            Ok(request) if request.session_id == model.session_id => {
                let snapshot = build_snapshot(model, emitter.current_seq());
                match serde_json::to_value(snapshot) {
                    Ok(value) => accepted(Some(value)),
                    Err(err) => rejected(&format!("snapshot serialization failed: {err}")),
                }
            }
            Ok(_) => rejected("unknown session"),
            Err(err) => rejected(&format!("invalid parameters: {err}")),
        },
        PROC_SELECT_CLUE => match serde_json::from_value::<SelectCluePayload>(params) {
            Ok(request) => select_clue(model, emitter, request),
            Err(err) => rejected(&format!("invalid parameters: {err}")),
        },
        PROC_RECORD_BUZZ => match serde_json::from_value::<BuzzPayload>(params) {
            Ok(request) => record_buzz(model, emitter, request),
            Err(err) => rejected(&format!("invalid parameters: {err}")),
        },
        PROC_SUBMIT_ANSWER => match serde_json::from_value::<AnswerPayload>(params) {
            Ok(request) => submit_answer(model, emitter, request),
            Err(err) => rejected(&format!("invalid parameters: {err}")),
        },
        PROC_SUBMIT_WAGER => match serde_json::from_value::<WagerPayload>(params) {
            Ok(request) => submit_wager(model, emitter, request),
            Err(err) => rejected(&format!("invalid parameters: {err}")),
        },
        PROC_SKIP_CLUE => match serde_json::from_value::<SkipCluePayload>(params) {
            Ok(request) => skip_clue(model, emitter, request),
            Err(err) => rejected(&format!("invalid parameters: {err}")),
        },
        other => rejected(&format!("unknown procedure `{other}`")),
    }
}

fn select_clue(
    model: &mut ServerModel,
    emitter: &Emitter<'_>,
    request: SelectCluePayload,
) -> RpcEnvelope {
    if model.status != SessionStatus::Active {
        return rejected("session is not active");
    }
    if model.current_clue.is_some() {
        return rejected("a clue is already in play");
    }
    if model.turn_player != Some(request.player_id) {
        return rejected("not this player's turn");
    }
    let Some(clue) = model.board.get_mut(&request.clue_id) else {
        return rejected("clue is not available");
    };
    if clue.state != ClueState::Hidden || clue.final_round {
        return rejected("clue is not available");
    }

    clue.state = ClueState::Revealed;
    clue.selected_by = Some(request.player_id);
    let daily_double = clue.daily_double;
    model.current_clue = Some(request.clue_id);
    model.next_rank = 1;

    emitter.emit(
        &ScopeKey::session(model.session_id),
        &ServerChange::ClueRevealed {
            seq: emitter.next_seq(),
            clue_id: request.clue_id,
            selected_by: request.player_id,
            daily_double,
        },
    );

    accepted(None)
}

fn record_buzz(model: &mut ServerModel, emitter: &Emitter<'_>, request: BuzzPayload) -> RpcEnvelope {
    if model.current_clue != Some(request.clue_id) {
        return rejected("buzzer not enabled");
    }
    let Some(clue) = model.board.get(&request.clue_id) else {
        return rejected("buzzer not enabled");
    };
    if clue.daily_double {
        return rejected("buzzer not enabled");
    }
    if !model.participants.contains_key(&request.player_id) {
        return rejected("unknown player");
    }
    if model.answered_wrong.contains(&request.player_id) {
        return rejected("locked out for this clue");
    }
    if model
        .presses
        .iter()
        .any(|press| press.player_id == request.player_id)
    {
        return rejected("already buzzed");
    }

    // Rank assignment happens inside the model lock: strictly increasing,
    // one per player, in arrival order.
    let rank = model.next_rank;
    model.next_rank += 1;
    let pressed_at = OffsetDateTime::now_utc();
    model.presses.push(HostPress {
        player_id: request.player_id,
        rank,
        pressed_at,
    });

    let seq = emitter.next_seq();
    emitter.emit(
        &ScopeKey::clue(model.session_id, request.clue_id),
        &ServerChange::BuzzRecorded {
            seq,
            player_id: request.player_id,
            rank,
            pressed_at,
        },
    );

    match serde_json::to_value(BuzzAck { rank, seq }) {
        Ok(value) => accepted(Some(value)),
        Err(err) => rejected(&format!("ack serialization failed: {err}")),
    }
}

fn submit_answer(
    model: &mut ServerModel,
    emitter: &Emitter<'_>,
    request: AnswerPayload,
) -> RpcEnvelope {
    if in_final_question(model) {
        return submit_final_answer(model, emitter, request);
    }

    if model.current_clue != Some(request.clue_id) {
        return rejected("no such clue in play");
    }
    let Some(clue) = model.board.get(&request.clue_id) else {
        return rejected("no such clue in play");
    };

    let (eligible, delta) = if clue.daily_double {
        let Some(wager) = model.clue_wagers.get(&request.player_id) else {
            return rejected("wager must be locked before answering");
        };
        (clue.selected_by == Some(request.player_id), wager.amount)
    } else {
        let holder = model
            .presses
            .iter()
            .filter(|press| !model.answered_wrong.contains(&press.player_id))
            .min_by_key(|press| press.rank)
            .map(|press| press.player_id);
        (holder == Some(request.player_id), clue.value)
    };
    if !eligible {
        return rejected("not this player's turn to answer");
    }

    let correct = judge(request.text.as_deref(), &clue.answer);
    let clue_id = clue.id;
    let daily_double = clue.daily_double;
    let clue_scope = ScopeKey::clue(model.session_id, clue_id);

    let score = {
        let Some(player) = model.participants.get_mut(&request.player_id) else {
            return rejected("unknown player");
        };
        if correct {
            player.score += delta;
        } else {
            player.score -= delta;
        }
        player.score
    };

    if correct {
        emitter.emit(
            &clue_scope,
            &ServerChange::AnswerJudged {
                seq: emitter.next_seq(),
                player_id: request.player_id,
                correct: true,
                rebuzz: false,
            },
        );
        emitter.emit(
            &clue_scope,
            &ServerChange::ScoreUpdated {
                seq: emitter.next_seq(),
                player_id: request.player_id,
                score,
            },
        );
        // Control of the board passes to whoever answered correctly.
        model.turn_player = Some(request.player_id);
        emitter.emit(
            &clue_scope,
            &ServerChange::TurnChanged {
                seq: emitter.next_seq(),
                player_id: request.player_id,
            },
        );
        close_clue(model, emitter, clue_id);
        return accepted(None);
    }

    model.answered_wrong.push(request.player_id);
    let rebuzz = !daily_double
        && model
            .participants
            .keys()
            .any(|id| !model.answered_wrong.contains(id));
    emitter.emit(
        &clue_scope,
        &ServerChange::AnswerJudged {
            seq: emitter.next_seq(),
            player_id: request.player_id,
            correct: false,
            rebuzz,
        },
    );
    emitter.emit(
        &clue_scope,
        &ServerChange::ScoreUpdated {
            seq: emitter.next_seq(),
            player_id: request.player_id,
            score,
        },
    );
    if !rebuzz {
        close_clue(model, emitter, clue_id);
    }

    accepted(None)
}

fn submit_final_answer(
    model: &mut ServerModel,
    emitter: &Emitter<'_>,
    request: AnswerPayload,
) -> RpcEnvelope {
    if !model.participants.contains_key(&request.player_id) {
        return rejected("unknown player");
    }
    if model.final_answers.contains_key(&request.player_id) {
        return rejected("already submitted");
    }
    model.final_answers.insert(request.player_id, request.text);

    if model.final_answers.len() == model.participants.len() {
        score_final_round(model, emitter);
    }
    accepted(None)
}

fn submit_wager(
    model: &mut ServerModel,
    emitter: &Emitter<'_>,
    request: WagerPayload,
) -> RpcEnvelope {
    let Some(player) = model.participants.get(&request.player_id) else {
        return rejected("unknown player");
    };
    let score = player.score;

    match request.clue_id {
        Some(clue_id) => {
            if model.current_clue != Some(clue_id) {
                return rejected("no such clue in play");
            }
            let Some(clue) = model.board.get(&clue_id) else {
                return rejected("no such clue in play");
            };
            if !clue.daily_double {
                return rejected("clue does not take a wager");
            }
            if clue.selected_by != Some(request.player_id) {
                return rejected("only the selector may wager");
            }
            if model.clue_wagers.contains_key(&request.player_id) {
                return rejected("already submitted");
            }
            let max = score.max(model.board_max_clue_value);
            if request.amount < model.min_wager || request.amount > max {
                return rejected("wager out of range");
            }

            model.clue_wagers.insert(
                request.player_id,
                Wager {
                    player_id: request.player_id,
                    amount: request.amount,
                    submitted_at: OffsetDateTime::now_utc(),
                },
            );
            emitter.emit(
                &ScopeKey::clue(model.session_id, clue_id),
                &ServerChange::WagerLocked {
                    seq: emitter.next_seq(),
                    player_id: request.player_id,
                },
            );
            accepted(None)
        }
        None => {
            if !in_final_wagering(model) {
                return rejected("no wager is expected now");
            }
            if model.final_wagers.contains_key(&request.player_id) {
                return rejected("already submitted");
            }
            let max = score.max(0);
            if request.amount < 0 || request.amount > max {
                return rejected("wager out of range");
            }

            model.final_wagers.insert(
                request.player_id,
                Wager {
                    player_id: request.player_id,
                    amount: request.amount,
                    submitted_at: OffsetDateTime::now_utc(),
                },
            );
            let session_scope = ScopeKey::session(model.session_id);
            emitter.emit(
                &session_scope,
                &ServerChange::WagerLocked {
                    seq: emitter.next_seq(),
                    player_id: request.player_id,
                },
            );

            if model.final_wagers.len() == model.participants.len() {
                if let Some(final_clue) = model
                    .board
                    .values_mut()
                    .find(|clue| clue.final_round)
                {
                    final_clue.state = ClueState::Revealed;
                }
                emitter.emit(
                    &session_scope,
                    &ServerChange::FinalWagersLocked {
                        seq: emitter.next_seq(),
                    },
                );
            }
            accepted(None)
        }
    }
}

fn skip_clue(model: &mut ServerModel, emitter: &Emitter<'_>, request: SkipCluePayload) -> RpcEnvelope {
    if model.current_clue != Some(request.clue_id) {
        return rejected("no such clue in play");
    }

    let clue_scope = ScopeKey::clue(model.session_id, request.clue_id);
    emitter.emit(
        &clue_scope,
        &ServerChange::BuzzersCleared {
            seq: emitter.next_seq(),
        },
    );
    close_clue(model, emitter, request.clue_id);

    accepted(None)
}

/// Spend the clue, clear the per-clue scratch state, and announce the close.
/// Also kicks off the final round when the board just completed.
fn close_clue(model: &mut ServerModel, emitter: &Emitter<'_>, clue_id: Uuid) {
    if let Some(clue) = model.board.get_mut(&clue_id) {
        clue.state = ClueState::Spent;
    }
    model.current_clue = None;
    model.presses.clear();
    model.answered_wrong.clear();
    model.clue_wagers.clear();
    model.next_rank = 1;

    emitter.emit(
        &ScopeKey::clue(model.session_id, clue_id),
        &ServerChange::ClueClosed {
            seq: emitter.next_seq(),
            clue_id,
        },
    );

    let regular_done = model
        .board
        .values()
        .filter(|clue| !clue.final_round)
        .all(|clue| clue.state == ClueState::Spent);
    if !regular_done {
        return;
    }

    let session_scope = ScopeKey::session(model.session_id);
    if model.board.values().any(|clue| clue.final_round) {
        emitter.emit(
            &session_scope,
            &ServerChange::BoardCompleted {
                seq: emitter.next_seq(),
            },
        );
    } else {
        // No final clue seeded: the game ends on the spent board.
        model.status = SessionStatus::Completed;
        let standings = model
            .participants
            .values()
            .map(|player| FinalStanding {
                player_id: player.user_id,
                wager: 0,
                correct: false,
                score: player.score,
            })
            .collect();
        emitter.emit(
            &session_scope,
            &ServerChange::FinalResults {
                seq: emitter.next_seq(),
                standings,
            },
        );
    }
}

fn score_final_round(model: &mut ServerModel, emitter: &Emitter<'_>) {
    let final_answer = model
        .board
        .values()
        .find(|clue| clue.final_round)
        .map(|clue| clue.answer.clone())
        .unwrap_or_default();

    let mut standings = Vec::with_capacity(model.participants.len());
    for player in model.participants.values_mut() {
        let wager = model
            .final_wagers
            .get(&player.user_id)
            .map(|wager| wager.amount)
            .unwrap_or(0);
        let answer = model
            .final_answers
            .get(&player.user_id)
            .cloned()
            .flatten();
        let correct = judge(answer.as_deref(), &final_answer);
        if correct {
            player.score += wager;
        } else {
            player.score -= wager;
        }
        standings.push(FinalStanding {
            player_id: player.user_id,
            wager,
            correct,
            score: player.score,
        });
    }

    if let Some(final_clue) = model.board.values_mut().find(|clue| clue.final_round) {
        final_clue.state = ClueState::Spent;
    }
    model.status = SessionStatus::Completed;

    emitter.emit(
        &ScopeKey::session(model.session_id),
        &ServerChange::FinalResults {
            seq: emitter.next_seq(),
            standings,
        },
    );
}

fn in_final_wagering(model: &ServerModel) -> bool {
    model.status == SessionStatus::Active
        && model.current_clue.is_none()
        && model.board.values().any(|clue| clue.final_round)
        && model
            .board
            .values()
            .filter(|clue| !clue.final_round)
            .all(|clue| clue.state == ClueState::Spent)
        && model.final_wagers.len() < model.participants.len()
}

fn in_final_question(model: &ServerModel) -> bool {
    model.status == SessionStatus::Active
        && model.current_clue.is_none()
        && !model.participants.is_empty()
        && model.board.values().any(|clue| clue.final_round)
        && model.final_wagers.len() == model.participants.len()
}

fn judge(submitted: Option<&str>, expected: &str) -> bool {
    submitted
        .map(|text| text.trim().eq_ignore_ascii_case(expected.trim()))
        .unwrap_or(false)
}

fn build_snapshot(model: &ServerModel, seq: u64) -> SessionSnapshot {
    let locked_wagers = if in_final_wagering(model) || in_final_question(model) {
        model.final_wagers.keys().copied().collect()
    } else {
        model.clue_wagers.keys().copied().collect()
    };

    SessionSnapshot {
        id: model.session_id,
        kind: GameKind::Jeopardy,
        status: model.status,
        round: 1,
        seq,
        turn_player: model.turn_player,
        updated_at: OffsetDateTime::now_utc(),
        participants: model
            .participants
            .values()
            .map(|player| ParticipantSnapshot {
                user_id: player.user_id,
                display_name: player.display_name.clone(),
                score: player.score,
            })
            .collect(),
        board: model
            .board
            .values()
            .map(|clue| ClueSnapshot {
                id: clue.id,
                category: clue.category.clone(),
                value: clue.value,
                prompt: match clue.state {
                    ClueState::Hidden => String::new(),
                    _ => clue.prompt.clone(),
                },
                state: clue.state,
                daily_double: clue.daily_double,
                final_round: clue.final_round,
                selected_by: clue.selected_by,
                answer: match clue.state {
                    ClueState::Spent => Some(clue.answer.clone()),
                    _ => None,
                },
            })
            .collect(),
        current_clue: model.current_clue,
        presses: model
            .presses
            .iter()
            .map(|press| BuzzSnapshot {
                player_id: press.player_id,
                rank: press.rank,
                pressed_at: press.pressed_at,
            })
            .collect(),
        locked_out: model.answered_wrong.clone(),
        locked_wagers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(players: &[Uuid]) -> SessionSeed {
        SessionSeed {
            session_id: Uuid::new_v4(),
            participants: players
                .iter()
                .enumerate()
                .map(|(index, id)| (*id, format!("player-{index}")))
                .collect(),
            clues: vec![
                ClueSeed {
                    id: Uuid::new_v4(),
                    category: "Science".into(),
                    value: 400,
                    prompt: "This state of matter conducts electricity".into(),
                    answer: "plasma".into(),
                    daily_double: false,
                    final_round: false,
                },
                ClueSeed {
                    id: Uuid::new_v4(),
                    category: "Science".into(),
                    value: 800,
                    prompt: "Closing clue".into(),
                    answer: "entropy".into(),
                    daily_double: false,
                    final_round: true,
                },
            ],
            turn_player: players[0],
            min_wager: 5,
            board_max_clue_value: 2000,
        }
    }

    async fn call(backend: &MemoryBackend, procedure: &str, params: serde_json::Value) -> RpcEnvelope {
        backend
            .call(procedure, params)
            .await
            .expect("in-process call never fails at the transport level")
    }

    fn first_regular_clue(backend: &MemoryBackend) -> Uuid {
        let model = backend.model.lock().expect("model lock");
        model
            .board
            .values()
            .find(|clue| !clue.final_round)
            .map(|clue| clue.id)
            .expect("seeded clue")
    }

    #[tokio::test]
    async fn ranks_are_assigned_in_strict_arrival_order() {
        let players: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let backend = MemoryBackend::new(seed(&players));
        let session_id = backend.model.lock().expect("model lock").session_id;
        let clue_id = first_regular_clue(&backend);

        let select = call(
            &backend,
            PROC_SELECT_CLUE,
            serde_json::to_value(SelectCluePayload {
                session_id,
                clue_id,
                player_id: players[0],
            })
            .expect("encode"),
        )
        .await;
        assert!(select.success);

        let mut ranks = Vec::new();
        for player in &players {
            let envelope = call(
                &backend,
                PROC_RECORD_BUZZ,
                serde_json::to_value(BuzzPayload {
                    session_id,
                    clue_id,
                    player_id: *player,
                })
                .expect("encode"),
            )
            .await;
            assert!(envelope.success);
            let ack: BuzzAck =
                serde_json::from_value(envelope.value.expect("ack value")).expect("decode ack");
            ranks.push(ack.rank);
        }

        assert_eq!(ranks, vec![1, 2, 3]);

        let duplicate = call(
            &backend,
            PROC_RECORD_BUZZ,
            serde_json::to_value(BuzzPayload {
                session_id,
                clue_id,
                player_id: players[0],
            })
            .expect("encode"),
        )
        .await;
        assert!(!duplicate.success);
        assert_eq!(duplicate.error.as_deref(), Some("already buzzed"));
    }

    #[tokio::test]
    async fn buzz_before_any_reveal_is_rejected() {
        let players: Vec<Uuid> = (0..2).map(|_| Uuid::new_v4()).collect();
        let backend = MemoryBackend::new(seed(&players));
        let session_id = backend.model.lock().expect("model lock").session_id;
        let clue_id = first_regular_clue(&backend);

        let envelope = call(
            &backend,
            PROC_RECORD_BUZZ,
            serde_json::to_value(BuzzPayload {
                session_id,
                clue_id,
                player_id: players[0],
            })
            .expect("encode"),
        )
        .await;
        assert!(!envelope.success);
        assert_eq!(envelope.error.as_deref(), Some("buzzer not enabled"));
    }

    #[tokio::test]
    async fn unknown_procedure_is_rejected_with_a_reason() {
        let players = vec![Uuid::new_v4()];
        let backend = MemoryBackend::new(seed(&players));
        let envelope = call(&backend, "launch_confetti", serde_json::json!({})).await;
        assert!(!envelope.success);
        assert!(envelope.error_message().contains("unknown procedure"));
    }
}
