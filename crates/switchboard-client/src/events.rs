//! Session event types.

use std::time::Duration;

use crate::metrics::ConnectionStatus;

/// Lifecycle events broadcast by a session.
///
/// Application frames are not events; they go to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Connection status changed.
    StatusChanged(ConnectionStatus),
    /// Socket opened.
    Connected,
    /// Socket closed.
    Disconnected {
        /// Close code, if one was received.
        code: Option<u16>,
        /// Close reason or transport error.
        reason: String,
    },
    /// A reconnection attempt is scheduled.
    Reconnecting {
        /// Zero-based attempt number.
        attempt: u32,
        /// Delay before the attempt, jitter included.
        delay: Duration,
    },
    /// Reconnection stopped after the configured number of attempts.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
    },
    /// The server accepted the auth token.
    Authenticated,
    /// Authentication failed; the session will not reconnect on its own.
    AuthenticationFailed {
        /// Why authentication failed.
        reason: String,
    },
    /// A transport error was recorded.
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_event_variants() {
        let disconnected = SessionEvent::Disconnected {
            code: Some(1006),
            reason: "reset".to_string(),
        };
        if let SessionEvent::Disconnected { code, reason } = disconnected {
            assert_eq!(code, Some(1006));
            assert_eq!(reason, "reset");
        } else {
            panic!("expected Disconnected");
        }

        let reconnecting = SessionEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_millis(2250),
        };
        assert!(matches!(
            reconnecting,
            SessionEvent::Reconnecting { attempt: 2, .. }
        ));

        let status = SessionEvent::StatusChanged(ConnectionStatus::Connecting);
        assert_eq!(
            status,
            SessionEvent::StatusChanged(ConnectionStatus::Connecting)
        );
    }
}
