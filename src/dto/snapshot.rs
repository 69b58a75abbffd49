use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::state::session::{ClueState, GameKind, SessionStatus};

/// Authoritative session snapshot returned by `fetch_session_snapshot`.
///
/// The client replaces its cached state wholesale with this payload; it never
/// merges individual fields into an older copy.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub id: Uuid,
    /// Which game this session plays.
    pub kind: GameKind,
    /// Lifecycle status of the session.
    pub status: SessionStatus,
    /// Current round number, 1-based.
    pub round: u32,
    /// Server sequence number at the time the snapshot was taken.
    pub seq: u64,
    /// Player whose turn it is to pick the next clue, if any.
    pub turn_player: Option<Uuid>,
    /// Last server-side mutation time.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub updated_at: OffsetDateTime,
    /// Participants in join order.
    pub participants: Vec<ParticipantSnapshot>,
    /// All clues on the board, including the final-round clue.
    pub board: Vec<ClueSnapshot>,
    /// Clue currently being played, if any.
    pub current_clue: Option<Uuid>,
    /// Buzzer presses recorded for the current clue.
    pub presses: Vec<BuzzSnapshot>,
    /// Players who already answered the current clue incorrectly.
    pub locked_out: Vec<Uuid>,
    /// Players whose wager (daily double or final round) is locked in.
    /// Amounts are not broadcast before the reveal.
    pub locked_wagers: Vec<Uuid>,
}

/// Wire form of one participant row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    /// Stable user identifier.
    pub user_id: Uuid,
    /// Display name chosen by the player.
    pub display_name: String,
    /// Current score; may go negative.
    pub score: i64,
}

/// Wire form of one board clue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClueSnapshot {
    /// Clue identifier.
    pub id: Uuid,
    /// Category label shown on the board.
    pub category: String,
    /// Point value of the clue.
    pub value: i64,
    /// Prompt text; empty until the clue is revealed.
    #[serde(default)]
    pub prompt: String,
    /// Board lifecycle state of the clue.
    pub state: ClueState,
    /// Whether this clue is a daily double.
    pub daily_double: bool,
    /// Whether this clue belongs to the final round.
    pub final_round: bool,
    /// Player who revealed the clue, once revealed.
    #[serde(default)]
    pub selected_by: Option<Uuid>,
    /// Correct answer; only present on feeds allowed to see it post-reveal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Wire form of one buzzer press.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuzzSnapshot {
    /// Player who pressed.
    pub player_id: Uuid,
    /// 1-based arrival order assigned by the server.
    pub rank: u32,
    /// Server-side arrival time.
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub pressed_at: OffsetDateTime,
}

/// One row of the final-round outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalStanding {
    /// Player the row describes.
    pub player_id: Uuid,
    /// Amount the player wagered.
    pub wager: i64,
    /// Whether the final answer was judged correct.
    pub correct: bool,
    /// Score after the final round was applied.
    pub score: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_round_trips_with_millisecond_timestamps() {
        let raw = serde_json::json!({
            "id": Uuid::new_v4(),
            "kind": "jeopardy",
            "status": "active",
            "round": 1,
            "seq": 42,
            "turn_player": null,
            "updated_at": 1_700_000_000_123_i64,
            "participants": [],
            "board": [],
            "current_clue": null,
            "presses": [],
            "locked_out": [],
            "locked_wagers": []
        });

        let snapshot: SessionSnapshot = serde_json::from_value(raw).expect("decode snapshot");
        assert_eq!(snapshot.seq, 42);
        assert_eq!(
            snapshot.updated_at.unix_timestamp_nanos() / 1_000_000,
            1_700_000_000_123
        );

        let encoded = serde_json::to_value(&snapshot).expect("encode snapshot");
        assert_eq!(encoded["updated_at"], 1_700_000_000_123_i64);
    }
}
