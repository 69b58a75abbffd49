#[cfg(feature = "http-backend")]
pub mod http;
#[cfg(feature = "memory-backend")]
pub mod memory;
pub mod transport;

use std::fmt;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Deserialize;
use uuid::Uuid;

use crate::backend::transport::TransportResult;

/// Identifies the single change feed a client listens to at a time: one game
/// session, narrowed to one clue while a clue is live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    /// Session the feed belongs to.
    pub session_id: Uuid,
    /// Clue the feed is narrowed to, when one is being played.
    pub clue_id: Option<Uuid>,
}

impl ScopeKey {
    /// Scope covering session-level events (board view, no live clue).
    pub fn session(session_id: Uuid) -> Self {
        Self {
            session_id,
            clue_id: None,
        }
    }

    /// Scope narrowed to a single live clue.
    pub fn clue(session_id: Uuid, clue_id: Uuid) -> Self {
        Self {
            session_id,
            clue_id: Some(clue_id),
        }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.clue_id {
            Some(clue_id) => write!(f, "session:{}/clue:{}", self.session_id, clue_id),
            None => write!(f, "session:{}", self.session_id),
        }
    }
}

/// Undecoded change notification as delivered by the push transport.
#[derive(Debug, Clone)]
pub struct RawEvent {
    /// Scope string the event was published under.
    pub scope: String,
    /// JSON payload, decoded at the subscription boundary.
    pub payload: String,
}

/// Result envelope returned by every remote procedure.
///
/// Failures are data, not panics: a rejected action comes back with
/// `success == false` and a human-readable `error`.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcEnvelope {
    /// Whether the procedure accepted the action.
    pub success: bool,
    /// Procedure-specific payload present on success.
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    /// Rejection reason present on failure.
    #[serde(default)]
    pub error: Option<String>,
}

impl RpcEnvelope {
    /// Rejection reason, or a placeholder when the backend omitted one.
    pub fn error_message(&self) -> String {
        self.error
            .clone()
            .unwrap_or_else(|| "rejected without reason".into())
    }
}

/// Ordered stream of raw change events for one scope.
pub type EventStream = BoxStream<'static, RawEvent>;

/// Remote procedure transport to the authoritative backend.
pub trait RpcTransport: Send + Sync {
    /// Invoke a named procedure with a JSON parameter object.
    fn call(
        &self,
        procedure: &str,
        params: serde_json::Value,
    ) -> BoxFuture<'static, TransportResult<RpcEnvelope>>;
}

/// Push transport delivering change notifications for a scope.
///
/// Implementations deliver events in the order the transport received them;
/// deduplication and filtering happen in the layers above.
pub trait RealtimeTransport: Send + Sync {
    /// Open a change feed for the given scope.
    fn open(&self, scope: &ScopeKey) -> BoxFuture<'static, TransportResult<EventStream>>;
}
