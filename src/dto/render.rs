use serde::Serialize;
use uuid::Uuid;

use crate::dto::phase::PhaseKind;

/// Compact view of client state published to the UI on every change.
///
/// This is the only outbound UI contract: the embedding application watches
/// the stream and re-renders whatever it likes from it.
#[derive(Debug, Serialize, Clone, Default)]
pub struct RenderSnapshot {
    /// Current phase label.
    pub phase: PhaseKind,
    /// Player holding the floor while answering, if any.
    pub answering_player: Option<Uuid>,
    /// Scoreboard rows in join order.
    pub scoreboard: Vec<ScoreLine>,
    /// Buzzer presses for the current clue in rank order.
    pub presses: Vec<PressLine>,
    /// The clue currently in play, if any.
    pub current_clue: Option<ClueView>,
    /// Rank this client holds for the current clue, if it buzzed.
    pub my_rank: Option<u32>,
    /// Whether this client already submitted an answer for the current clue.
    pub answer_submitted: bool,
    /// Whether this client already locked a wager for the current clue/final.
    pub wager_submitted: bool,
    /// Whether this client holds the next clue selection.
    pub turn_is_mine: bool,
}

/// One scoreboard row.
#[derive(Debug, Serialize, Clone)]
pub struct ScoreLine {
    /// Player the row describes.
    pub player_id: Uuid,
    /// Display name.
    pub display_name: String,
    /// Current score.
    pub score: i64,
    /// Whether the row is the local player.
    pub is_me: bool,
}

/// One buzzer press row.
#[derive(Debug, Serialize, Clone)]
pub struct PressLine {
    /// Player who pressed.
    pub player_id: Uuid,
    /// Assigned rank.
    pub rank: u32,
}

/// UI-facing view of the live clue.
#[derive(Debug, Serialize, Clone)]
pub struct ClueView {
    /// Clue identifier.
    pub id: Uuid,
    /// Category label.
    pub category: String,
    /// Point value.
    pub value: i64,
    /// Prompt text.
    pub prompt: String,
    /// Whether the clue is a daily double.
    pub daily_double: bool,
}
