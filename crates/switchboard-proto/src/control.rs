//! Reserved control frames.
//!
//! These types are consumed by the transport itself and never reach
//! application subscribers: heartbeat (`ping`/`pong`), the auth handshake
//! (`auth`, `auth_success`, `auth_failed`, `auth_required`) and correlated
//! responses (`<type>_response`).

use serde_json::{json, Value};

use crate::messages::Frame;
use crate::types::now_millis;

/// Heartbeat probe.
pub const PING: &str = "ping";
/// Heartbeat reply echoing the probe timestamp.
pub const PONG: &str = "pong";
/// Client authentication frame carrying a token.
pub const AUTH: &str = "auth";
/// Server accepted the token.
pub const AUTH_SUCCESS: &str = "auth_success";
/// Server rejected the token.
pub const AUTH_FAILED: &str = "auth_failed";
/// Server requires a fresh token (mid-session expiry).
pub const AUTH_REQUIRED: &str = "auth_required";
/// Suffix of response frames correlated to a request.
pub const RESPONSE_SUFFIX: &str = "_response";
/// Payload field carrying the correlation id.
pub const REQUEST_ID_FIELD: &str = "requestId";

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Closure because authentication failed; the client does not reconnect.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

/// Whether a message type is reserved for the transport.
#[must_use]
pub fn is_reserved(kind: &str) -> bool {
    matches!(
        kind,
        PING | PONG | AUTH | AUTH_SUCCESS | AUTH_FAILED | AUTH_REQUIRED
    ) || is_response(kind)
}

/// Whether a message type is a correlated response.
#[must_use]
pub fn is_response(kind: &str) -> bool {
    kind.len() > RESPONSE_SUFFIX.len() && kind.ends_with(RESPONSE_SUFFIX)
}

/// The response type correlated to a request type.
#[must_use]
pub fn response_type(kind: &str) -> String {
    format!("{kind}{RESPONSE_SUFFIX}")
}

/// A decoded control frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFrame {
    /// Heartbeat probe with its send time.
    Ping {
        /// Epoch milliseconds when the probe was sent.
        timestamp: Option<i64>,
    },
    /// Heartbeat reply.
    Pong {
        /// Echoed probe timestamp.
        timestamp: Option<i64>,
    },
    /// Client authentication.
    Auth {
        /// Bearer token.
        token: String,
    },
    /// Token accepted.
    AuthSuccess,
    /// Token rejected.
    AuthFailed {
        /// Server-provided reason.
        reason: Option<String>,
    },
    /// Token expired; the client must refresh.
    AuthRequired,
}

impl ControlFrame {
    /// Decode a frame into a control frame, if it is one.
    ///
    /// Correlated responses are not control frames; they go to the dispatcher.
    #[must_use]
    pub fn parse(frame: &Frame) -> Option<Self> {
        let timestamp = || frame.payload.get("timestamp").and_then(Value::as_i64);
        match frame.kind.as_str() {
            PING => Some(Self::Ping {
                timestamp: timestamp(),
            }),
            PONG => Some(Self::Pong {
                timestamp: timestamp(),
            }),
            AUTH => Some(Self::Auth {
                token: frame.payload_str("token").unwrap_or_default().to_string(),
            }),
            AUTH_SUCCESS => Some(Self::AuthSuccess),
            AUTH_FAILED => Some(Self::AuthFailed {
                reason: frame
                    .payload_str("reason")
                    .or_else(|| frame.payload_str("message"))
                    .map(ToString::to_string),
            }),
            AUTH_REQUIRED => Some(Self::AuthRequired),
            _ => None,
        }
    }

    /// Build a heartbeat probe stamped with the current time.
    #[must_use]
    pub fn ping() -> Frame {
        Frame::new(PING, json!({ "timestamp": now_millis() }))
    }

    /// Build a heartbeat reply echoing the given payload.
    #[must_use]
    pub fn pong(payload: Value) -> Frame {
        Frame::new(PONG, payload)
    }

    /// Build an authentication frame.
    #[must_use]
    pub fn auth(token: &str) -> Frame {
        Frame::new(AUTH, json!({ "token": token }))
    }
}
