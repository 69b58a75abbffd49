use std::error::Error;
use thiserror::Error;

/// Result alias for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Error raised by backend transports regardless of the underlying protocol.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("backend unreachable: {message}")]
    Unreachable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("channel closed: {0}")]
    ChannelClosed(String),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl TransportError {
    /// Construct an unreachable error from any backend failure.
    pub fn unreachable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        TransportError::Unreachable {
            message,
            source: Box::new(source),
        }
    }
}
