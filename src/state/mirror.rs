use tracing::{debug, warn};
use uuid::Uuid;

use crate::dto::events::ServerChange;
use crate::dto::snapshot::SessionSnapshot;
use crate::state::phase_machine::{CluePhase, FinalPhase, GamePhase};
use crate::state::session::{
    BuzzerPress, Clue, ClueState, GameSession, Participant, SessionStatus,
};

/// Optimistic or authoritative claim on this client's buzzer rank.
///
/// Both the RPC acknowledgement and the broadcast event can set it; the one
/// with the higher server sequence number wins and overwrites the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankClaim {
    /// 1-based rank.
    pub rank: u32,
    /// Server sequence number the claim came from.
    pub seq: u64,
}

/// Client-held copy of the most recently known server state.
///
/// Mutated exclusively by the coordinator's event loop and by submission
/// acknowledgements; performs no I/O of its own. Accessors return `Option`
/// on a miss, they never panic.
#[derive(Debug)]
pub struct SessionMirror {
    my_user: Uuid,
    session: Option<GameSession>,
    presses: Vec<BuzzerPress>,
    locked_out: Vec<Uuid>,
    locked_wagers: Vec<Uuid>,
    my_rank: Option<RankClaim>,
    answer_submitted: bool,
    wager_submitted: bool,
    buzz_inflight: bool,
    last_seq: u64,
}

impl SessionMirror {
    /// Create an empty mirror for the given local user.
    pub fn new(my_user: Uuid) -> Self {
        Self {
            my_user,
            session: None,
            presses: Vec::new(),
            locked_out: Vec::new(),
            locked_wagers: Vec::new(),
            my_rank: None,
            answer_submitted: false,
            wager_submitted: false,
            buzz_inflight: false,
            last_seq: 0,
        }
    }

    /// The local user this mirror belongs to.
    pub fn my_user(&self) -> Uuid {
        self.my_user
    }

    /// The cached session, if one has been loaded.
    pub fn session(&self) -> Option<&GameSession> {
        self.session.as_ref()
    }

    /// Look up a participant by user id.
    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.session.as_ref()?.participants.get(&user_id)
    }

    /// A participant's current score.
    pub fn score_of(&self, user_id: Uuid) -> Option<i64> {
        self.participant(user_id).map(|p| p.score)
    }

    /// The clue currently in play, if any.
    pub fn current_clue(&self) -> Option<&Clue> {
        self.session.as_ref()?.current_clue()
    }

    /// Player whose turn it is to pick the next clue.
    pub fn turn_player(&self) -> Option<Uuid> {
        self.session.as_ref()?.turn_player
    }

    /// Buzzer presses for the current clue in the order they were ranked.
    pub fn presses(&self) -> &[BuzzerPress] {
        &self.presses
    }

    /// Players excluded from the current clue after a wrong answer.
    pub fn locked_out(&self) -> &[Uuid] {
        &self.locked_out
    }

    /// This client's rank for the current clue, if it buzzed.
    pub fn my_rank(&self) -> Option<u32> {
        self.my_rank.map(|claim| claim.rank)
    }

    /// Whether this client already submitted an answer for the current clue.
    pub fn answer_submitted(&self) -> bool {
        self.answer_submitted
    }

    /// Whether this client already locked a wager for the current clue/final.
    pub fn wager_submitted(&self) -> bool {
        self.wager_submitted
    }

    /// Whether a buzz RPC from this client is still in flight.
    pub fn buzz_inflight(&self) -> bool {
        self.buzz_inflight
    }

    /// Flip the buzz in-flight guard; returns the previous value.
    pub fn set_buzz_inflight(&mut self, value: bool) -> bool {
        std::mem::replace(&mut self.buzz_inflight, value)
    }

    /// Flip the answer-submitted guard; returns the previous value.
    pub fn set_answer_submitted(&mut self, value: bool) -> bool {
        std::mem::replace(&mut self.answer_submitted, value)
    }

    /// Flip the wager-submitted guard; returns the previous value.
    pub fn set_wager_submitted(&mut self, value: bool) -> bool {
        std::mem::replace(&mut self.wager_submitted, value)
    }

    /// The lowest-ranked press whose player is still eligible to answer.
    pub fn next_eligible_press(&self) -> Option<&BuzzerPress> {
        self.presses
            .iter()
            .filter(|press| !self.locked_out.contains(&press.player_id))
            .min_by_key(|press| press.rank)
    }

    /// Record this client's rank, keeping whichever claim carries the higher
    /// server sequence number. Overwrites, never merges.
    pub fn reconcile_my_rank(&mut self, rank: u32, seq: u64) {
        match self.my_rank {
            Some(existing) if existing.seq >= seq => {
                if existing.rank != rank {
                    debug!(
                        kept = existing.rank,
                        ignored = rank,
                        "ignoring stale rank claim"
                    );
                }
            }
            _ => self.my_rank = Some(RankClaim { rank, seq }),
        }
    }

    /// Replace all cached state wholesale from an authoritative snapshot.
    ///
    /// Local submission guards survive only when the snapshot still shows the
    /// same live clue; otherwise they reset with the rest of the state.
    pub fn apply_snapshot(&mut self, snapshot: &SessionSnapshot) {
        let same_clue = self
            .session
            .as_ref()
            .map(|session| session.current_clue == snapshot.current_clue)
            .unwrap_or(false);

        self.session = Some(GameSession::from(snapshot));
        self.presses = snapshot
            .presses
            .iter()
            .map(|press| BuzzerPress {
                player_id: press.player_id,
                rank: press.rank,
                pressed_at: press.pressed_at,
            })
            .collect();
        self.locked_out = snapshot.locked_out.clone();
        self.locked_wagers = snapshot.locked_wagers.clone();
        self.last_seq = snapshot.seq;

        // The snapshot is authoritative for "my" rank too.
        self.my_rank = self
            .presses
            .iter()
            .find(|press| press.player_id == self.my_user)
            .map(|press| RankClaim {
                rank: press.rank,
                seq: snapshot.seq,
            });

        if !same_clue {
            self.answer_submitted = false;
            self.wager_submitted = self.locked_wagers.contains(&self.my_user);
            self.buzz_inflight = false;
        }
    }

    /// Apply one change event. Returns `true` when cached state changed.
    ///
    /// Events carry the server's monotonic sequence number; anything at or
    /// below the last applied sequence is a duplicate and is ignored.
    pub fn apply_change(&mut self, change: &ServerChange) -> bool {
        if let Some(seq) = change.seq() {
            if seq <= self.last_seq {
                debug!(seq, last_seq = self.last_seq, "ignoring stale change");
                return false;
            }
            self.last_seq = seq;
        }

        match change {
            ServerChange::SessionReplaced { session, .. } => {
                self.apply_snapshot(session);
                true
            }
            ServerChange::ClueRevealed {
                clue_id,
                selected_by,
                ..
            } => {
                let Some(session) = self.session.as_mut() else {
                    return false;
                };
                let Some(clue) = session.board.get_mut(clue_id) else {
                    warn!(%clue_id, "reveal for a clue not on the board");
                    return false;
                };
                clue.state = ClueState::Revealed;
                clue.selected_by = Some(*selected_by);
                session.current_clue = Some(*clue_id);
                self.reset_clue_scope();
                true
            }
            ServerChange::BuzzRecorded {
                seq,
                player_id,
                rank,
                pressed_at,
            } => {
                // Dedup: a press whose player or rank is already known is a
                // redelivery of state we hold.
                if self
                    .presses
                    .iter()
                    .any(|press| press.player_id == *player_id || press.rank == *rank)
                {
                    return false;
                }
                self.presses.push(BuzzerPress {
                    player_id: *player_id,
                    rank: *rank,
                    pressed_at: *pressed_at,
                });
                if *player_id == self.my_user {
                    self.reconcile_my_rank(*rank, *seq);
                }
                true
            }
            ServerChange::BuzzersCleared { .. } => {
                self.presses.clear();
                self.my_rank = None;
                true
            }
            ServerChange::AnswerJudged {
                player_id, correct, ..
            } => {
                if !correct && !self.locked_out.contains(player_id) {
                    self.locked_out.push(*player_id);
                }
                true
            }
            ServerChange::WagerLocked { player_id, .. } => {
                if !self.locked_wagers.contains(player_id) {
                    self.locked_wagers.push(*player_id);
                }
                if *player_id == self.my_user {
                    self.wager_submitted = true;
                }
                true
            }
            ServerChange::ScoreUpdated {
                player_id, score, ..
            } => {
                let Some(session) = self.session.as_mut() else {
                    return false;
                };
                match session.participants.get_mut(player_id) {
                    Some(participant) => {
                        participant.score = *score;
                        true
                    }
                    None => {
                        warn!(%player_id, "score update for unknown participant");
                        false
                    }
                }
            }
            ServerChange::TurnChanged { player_id, .. } => {
                let Some(session) = self.session.as_mut() else {
                    return false;
                };
                session.turn_player = Some(*player_id);
                true
            }
            ServerChange::ClueClosed { clue_id, .. } => {
                let Some(session) = self.session.as_mut() else {
                    return false;
                };
                if let Some(clue) = session.board.get_mut(clue_id) {
                    clue.state = ClueState::Spent;
                }
                session.current_clue = None;
                self.reset_clue_scope();
                true
            }
            ServerChange::BoardCompleted { .. } => {
                self.reset_clue_scope();
                true
            }
            ServerChange::FinalWagersLocked { .. } => true,
            ServerChange::FinalResults { standings, .. } => {
                let Some(session) = self.session.as_mut() else {
                    return false;
                };
                for row in standings {
                    if let Some(participant) = session.participants.get_mut(&row.player_id) {
                        participant.score = row.score;
                    }
                }
                session.status = SessionStatus::Completed;
                true
            }
            ServerChange::Unknown => false,
        }
    }

    /// Re-derive the phase from the cached authoritative state.
    ///
    /// Used after a reconnect or a feed-scope switch: phase is a view, never
    /// resumed from a stale copy.
    pub fn derive_phase(&self) -> GamePhase {
        let Some(session) = self.session.as_ref() else {
            return GamePhase::Board;
        };

        if session.status == SessionStatus::Completed {
            return GamePhase::Final(FinalPhase::Results);
        }

        if let Some(clue) = session.current_clue() {
            if clue.daily_double {
                let selector = clue.selected_by.unwrap_or(self.my_user);
                if self.locked_wagers.contains(&selector) {
                    return GamePhase::Clue(CluePhase::Answering {
                        player: selector,
                        rank: None,
                        locked_out: vec![],
                    });
                }
                return GamePhase::Clue(CluePhase::Wagering { player: selector });
            }

            if let Some(press) = self.next_eligible_press() {
                return GamePhase::Clue(CluePhase::Answering {
                    player: press.player_id,
                    rank: Some(press.rank),
                    locked_out: self.locked_out.clone(),
                });
            }
            return GamePhase::Clue(CluePhase::BuzzersOpen {
                locked_out: self.locked_out.clone(),
            });
        }

        if session.board_complete() && session.final_clue().is_some() {
            let everyone_locked = session
                .participants
                .keys()
                .all(|id| self.locked_wagers.contains(id));
            if everyone_locked && !session.participants.is_empty() {
                return GamePhase::Final(FinalPhase::Question);
            }
            return GamePhase::Final(FinalPhase::Wagering);
        }

        GamePhase::Board
    }

    /// Clear per-clue state when the live clue changes.
    fn reset_clue_scope(&mut self) {
        self.presses.clear();
        self.locked_out.clear();
        self.locked_wagers.clear();
        self.my_rank = None;
        self.answer_submitted = false;
        self.wager_submitted = false;
        self.buzz_inflight = false;
    }
}
