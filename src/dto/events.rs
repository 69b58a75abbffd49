use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dto::snapshot::{FinalStanding, SessionSnapshot};

/// Error raised when an inbound change payload cannot be decoded.
#[derive(Debug, Error)]
#[error("malformed change payload: {0}")]
pub struct DecodeError(#[from] serde_json::Error);

/// Change notifications pushed by the backend over the realtime feed.
///
/// Every variant carries the server's monotonic sequence number so stale or
/// duplicated deliveries can be recognized downstream. Unrecognized change
/// types decode to [`ServerChange::Unknown`] and are dropped at the
/// subscription boundary instead of tearing the feed down.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerChange {
    /// Full authoritative snapshot; replaces all cached session state.
    SessionReplaced {
        /// Sequence number of the change.
        seq: u64,
        /// The replacement snapshot.
        session: SessionSnapshot,
    },
    /// The turn holder revealed a clue.
    ClueRevealed {
        /// Sequence number of the change.
        seq: u64,
        /// Clue that was revealed.
        clue_id: Uuid,
        /// Player who picked it.
        selected_by: Uuid,
        /// Whether the clue is a daily double.
        daily_double: bool,
    },
    /// The server ranked a buzzer press for the current clue.
    BuzzRecorded {
        /// Sequence number of the change.
        seq: u64,
        /// Player who pressed.
        player_id: Uuid,
        /// 1-based arrival order.
        rank: u32,
        /// Server-side arrival time.
        #[serde_as(as = "TimestampMilliSeconds<i64>")]
        pressed_at: OffsetDateTime,
    },
    /// All presses for the current clue were discarded (skip or re-buzz).
    BuzzersCleared {
        /// Sequence number of the change.
        seq: u64,
    },
    /// The server judged a submitted answer.
    AnswerJudged {
        /// Sequence number of the change.
        seq: u64,
        /// Player whose answer was judged.
        player_id: Uuid,
        /// Whether the answer was correct.
        correct: bool,
        /// Whether the buzzers reopen for the remaining players.
        rebuzz: bool,
    },
    /// A wager (daily double or final round) was locked in.
    WagerLocked {
        /// Sequence number of the change.
        seq: u64,
        /// Player whose wager is locked.
        player_id: Uuid,
    },
    /// A participant's score changed.
    ScoreUpdated {
        /// Sequence number of the change.
        seq: u64,
        /// Player whose score changed.
        player_id: Uuid,
        /// New absolute score.
        score: i64,
    },
    /// The turn holder changed.
    TurnChanged {
        /// Sequence number of the change.
        seq: u64,
        /// Player who now picks the next clue.
        player_id: Uuid,
    },
    /// The current clue finished and left play.
    ClueClosed {
        /// Sequence number of the change.
        seq: u64,
        /// Clue that closed.
        clue_id: Uuid,
    },
    /// Every regular clue is spent; the final round begins.
    BoardCompleted {
        /// Sequence number of the change.
        seq: u64,
    },
    /// Every participant's final wager is locked; the final clue is live.
    FinalWagersLocked {
        /// Sequence number of the change.
        seq: u64,
    },
    /// Final-round outcome for every participant.
    FinalResults {
        /// Sequence number of the change.
        seq: u64,
        /// Outcome rows, one per participant.
        standings: Vec<FinalStanding>,
    },
    /// Change type this client version does not understand.
    #[serde(other)]
    Unknown,
}

impl ServerChange {
    /// Decode a raw JSON payload into a typed change.
    pub fn from_json_str(payload: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Sequence number carried by the change, if it has one.
    pub fn seq(&self) -> Option<u64> {
        match self {
            ServerChange::SessionReplaced { seq, .. }
            | ServerChange::ClueRevealed { seq, .. }
            | ServerChange::BuzzRecorded { seq, .. }
            | ServerChange::BuzzersCleared { seq }
            | ServerChange::AnswerJudged { seq, .. }
            | ServerChange::WagerLocked { seq, .. }
            | ServerChange::ScoreUpdated { seq, .. }
            | ServerChange::TurnChanged { seq, .. }
            | ServerChange::ClueClosed { seq, .. }
            | ServerChange::BoardCompleted { seq }
            | ServerChange::FinalWagersLocked { seq }
            | ServerChange::FinalResults { seq, .. } => Some(*seq),
            ServerChange::Unknown => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_buzz_event() {
        let payload = format!(
            r#"{{"type":"buzz_recorded","seq":7,"player_id":"{}","rank":1,"pressed_at":1700000000000}}"#,
            Uuid::new_v4()
        );
        let change = ServerChange::from_json_str(&payload).expect("decode");
        match change {
            ServerChange::BuzzRecorded { seq, rank, .. } => {
                assert_eq!(seq, 7);
                assert_eq!(rank, 1);
            }
            other => panic!("expected buzz_recorded, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_type_maps_to_unknown() {
        let change =
            ServerChange::from_json_str(r#"{"type":"confetti_launched","seq":3}"#).expect("decode");
        assert!(matches!(change, ServerChange::Unknown));
        assert_eq!(change.seq(), None);
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        assert!(ServerChange::from_json_str("{not json").is_err());
    }
}
