//! Error types for switchboard-client.

use std::time::Duration;

use thiserror::Error;

/// Errors returned to callers of the session API.
///
/// Transport failures are not in this list: they are recovered by the
/// reconnection loop and observed through the connection state and
/// [`SessionEvent::Error`](crate::events::SessionEvent::Error).
#[derive(Debug, Error)]
pub enum ClientError {
    /// The outbound queue is full and holds no low-priority message to evict.
    #[error("outbound queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// No correlated response arrived in time.
    #[error("request '{kind}' timed out after {}ms", .timeout.as_millis())]
    RequestTimeout {
        /// Request message type.
        kind: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The connection did not reach the awaited status in time.
    #[error("status '{status}' not reached after {}ms", .timeout.as_millis())]
    StatusTimeout {
        /// Awaited status.
        status: crate::metrics::ConnectionStatus,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The session was closed and its driver task has stopped.
    #[error("session closed")]
    SessionClosed,

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// URL could not be parsed.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] switchboard_proto::ProtoError),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
