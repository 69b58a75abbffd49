use thiserror::Error;

use crate::backend::transport::TransportError;
use crate::state::phase_machine::{AbortError, ApplyError, PlanError};

/// Errors produced when submitting a player action.
///
/// Guard failures (`AlreadyBuzzed`, `AlreadySubmitted`, `NotYourTurn`,
/// `LockedOut`, `WagerOutOfRange`) short-circuit before any network call.
/// `Rejected` carries the backend's verdict and is authoritative: the action
/// is currently invalid, so nothing retries it automatically.
#[derive(Debug, Error)]
pub enum ActionError {
    /// The action does not apply to the current phase.
    #[error("action unavailable: {0}")]
    Unavailable(String),
    /// This client already buzzed (or its buzz is still in flight).
    #[error("already buzzed")]
    AlreadyBuzzed,
    /// This client already submitted an answer or wager for this clue.
    #[error("already submitted")]
    AlreadySubmitted,
    /// Another player holds the clue selection.
    #[error("not your turn")]
    NotYourTurn,
    /// This client answered the current clue incorrectly and is excluded.
    #[error("locked out of this clue")]
    LockedOut,
    /// The wager is outside the allowed bounds.
    #[error("wager out of range: must be between {min} and {max}")]
    WagerOutOfRange {
        /// Lowest acceptable amount.
        min: i64,
        /// Highest acceptable amount.
        max: i64,
    },
    /// The payload failed local validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The backend rejected the action.
    #[error("rejected: {0}")]
    Rejected(String),
    /// The submission exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
    /// The transport failed before a verdict was reached.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Top-level errors surfaced by the coordinator to the embedding application.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An action submission failed.
    #[error(transparent)]
    Action(#[from] ActionError),
    /// The connection could not be established and retries are exhausted.
    #[error("connection failed: retries exhausted")]
    ConnectFailed,
}

impl From<PlanError> for ActionError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ActionError::Unavailable("phase transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => ActionError::Unavailable(invalid.to_string()),
        }
    }
}

impl From<ApplyError> for ActionError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ActionError::Unavailable("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ActionError::Unavailable("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => ActionError::Unavailable(format!(
                "phase changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => ActionError::Unavailable(format!(
                "phase version mismatch during transition (expected {expected}, got {actual})"
            )),
        }
    }
}

impl From<AbortError> for ActionError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ActionError::Unavailable("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                ActionError::Unavailable("transition plan does not match".into())
            }
        }
    }
}

impl From<validator::ValidationErrors> for ActionError {
    fn from(err: validator::ValidationErrors) -> Self {
        ActionError::InvalidInput(format!("validation failed: {err}"))
    }
}
