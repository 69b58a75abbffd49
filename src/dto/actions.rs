use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Procedure revealing a clue on behalf of the turn holder.
pub const PROC_SELECT_CLUE: &str = "select_clue";
/// Procedure recording a buzzer press; returns the assigned rank.
pub const PROC_RECORD_BUZZ: &str = "record_buzzer_press";
/// Procedure submitting an answer for judging.
pub const PROC_SUBMIT_ANSWER: &str = "submit_answer";
/// Procedure locking in a daily-double or final-round wager.
pub const PROC_SUBMIT_WAGER: &str = "submit_wager";
/// Procedure abandoning the current clue.
pub const PROC_SKIP_CLUE: &str = "skip_clue";
/// Procedure returning the authoritative session snapshot.
pub const PROC_FETCH_SNAPSHOT: &str = "fetch_session_snapshot";

/// Parameters for [`PROC_SELECT_CLUE`].
#[derive(Debug, Serialize, Deserialize)]
pub struct SelectCluePayload {
    /// Session the clue belongs to.
    pub session_id: Uuid,
    /// Clue to reveal.
    pub clue_id: Uuid,
    /// Player making the selection.
    pub player_id: Uuid,
}

/// Parameters for [`PROC_RECORD_BUZZ`].
#[derive(Debug, Serialize, Deserialize)]
pub struct BuzzPayload {
    /// Session the press belongs to.
    pub session_id: Uuid,
    /// Clue the press is for.
    pub clue_id: Uuid,
    /// Player pressing the buzzer.
    pub player_id: Uuid,
}

/// Parameters for [`PROC_SUBMIT_ANSWER`].
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct AnswerPayload {
    /// Session the answer belongs to.
    pub session_id: Uuid,
    /// Clue being answered; the final-round clue during the final.
    pub clue_id: Uuid,
    /// Player answering.
    pub player_id: Uuid,
    /// Answer text; `None` records a timed-out non-answer.
    #[validate(length(max = 512))]
    pub text: Option<String>,
}

/// Parameters for [`PROC_SUBMIT_WAGER`].
#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct WagerPayload {
    /// Session the wager belongs to.
    pub session_id: Uuid,
    /// Daily-double clue, or `None` for the final-round wager.
    pub clue_id: Option<Uuid>,
    /// Player wagering.
    pub player_id: Uuid,
    /// Amount wagered; bounds are enforced again server-side.
    #[validate(range(min = 0))]
    pub amount: i64,
}

/// Parameters for [`PROC_SKIP_CLUE`].
#[derive(Debug, Serialize, Deserialize)]
pub struct SkipCluePayload {
    /// Session the clue belongs to.
    pub session_id: Uuid,
    /// Clue being abandoned.
    pub clue_id: Uuid,
    /// Player requesting the skip.
    pub player_id: Uuid,
}

/// Parameters for [`PROC_FETCH_SNAPSHOT`].
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Session to snapshot.
    pub session_id: Uuid,
}

/// Success value returned by [`PROC_RECORD_BUZZ`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuzzAck {
    /// 1-based rank assigned to the press.
    pub rank: u32,
    /// Sequence number of the matching broadcast event, used to reconcile
    /// the optimistic local copy against the authoritative one.
    pub seq: u64,
}
