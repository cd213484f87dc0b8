//! Session audit event types.

use crate::error::{AuditError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Severity level for audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational event.
    Info = 0,
    /// Low severity (e.g., a scheduled reconnect).
    Low = 1,
    /// Medium severity (e.g., an abnormal closure).
    Medium = 2,
    /// High severity (e.g., authentication failure, reconnects exhausted).
    High = 3,
}

impl Severity {
    /// Returns the string representation of this severity.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session lifecycle event reported to the audit sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// A reconnection attempt was scheduled after a non-intentional close.
    ReconnectScheduled {
        /// Unique event identifier.
        event_id: Uuid,
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// Severity level.
        severity: Severity,
        /// Client identifier of the session.
        client_id: Option<String>,
        /// Zero-based attempt number.
        attempt: u32,
        /// Delay before the attempt, including jitter.
        delay_ms: u64,
    },

    /// The socket closed with a code other than normal closure.
    AbnormalClosure {
        /// Unique event identifier.
        event_id: Uuid,
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// Severity level.
        severity: Severity,
        /// Client identifier of the session.
        client_id: Option<String>,
        /// Close code, if the peer sent one.
        code: Option<u16>,
        /// Close reason or transport error.
        reason: String,
    },

    /// Authentication failed or the token could not be refreshed.
    AuthenticationFailure {
        /// Unique event identifier.
        event_id: Uuid,
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// Severity level.
        severity: Severity,
        /// Client identifier of the session.
        client_id: Option<String>,
        /// Why authentication failed.
        reason: String,
    },

    /// Reconnection stopped after the configured number of attempts.
    ReconnectExhausted {
        /// Unique event identifier.
        event_id: Uuid,
        /// When the event occurred.
        timestamp: DateTime<Utc>,
        /// Severity level.
        severity: Severity,
        /// Client identifier of the session.
        client_id: Option<String>,
        /// Attempts made.
        attempts: u32,
    },
}

impl AuditEvent {
    /// Creates a reconnect-scheduled event.
    #[must_use]
    pub fn reconnect_scheduled(attempt: u32, delay_ms: u64) -> Self {
        Self::ReconnectScheduled {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity: Severity::Low,
            client_id: None,
            attempt,
            delay_ms,
        }
    }

    /// Creates an abnormal-closure event.
    #[must_use]
    pub fn abnormal_closure(code: Option<u16>, reason: impl Into<String>) -> Self {
        Self::AbnormalClosure {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity: Severity::Medium,
            client_id: None,
            code,
            reason: reason.into(),
        }
    }

    /// Creates an authentication failure event.
    #[must_use]
    pub fn authentication_failure(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailure {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity: Severity::High,
            client_id: None,
            reason: reason.into(),
        }
    }

    /// Creates a reconnect-exhausted event.
    #[must_use]
    pub fn reconnect_exhausted(attempts: u32) -> Self {
        Self::ReconnectExhausted {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity: Severity::High,
            client_id: None,
            attempts,
        }
    }

    /// Tags the event with the session's client identifier.
    #[must_use]
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        match &mut self {
            Self::ReconnectScheduled { client_id, .. }
            | Self::AbnormalClosure { client_id, .. }
            | Self::AuthenticationFailure { client_id, .. }
            | Self::ReconnectExhausted { client_id, .. } => *client_id = Some(id.into()),
        }
        self
    }

    /// Returns the event ID.
    #[must_use]
    pub const fn event_id(&self) -> Uuid {
        match self {
            Self::ReconnectScheduled { event_id, .. }
            | Self::AbnormalClosure { event_id, .. }
            | Self::AuthenticationFailure { event_id, .. }
            | Self::ReconnectExhausted { event_id, .. } => *event_id,
        }
    }

    /// Returns the event timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ReconnectScheduled { timestamp, .. }
            | Self::AbnormalClosure { timestamp, .. }
            | Self::AuthenticationFailure { timestamp, .. }
            | Self::ReconnectExhausted { timestamp, .. } => *timestamp,
        }
    }

    /// Returns the severity level.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::ReconnectScheduled { severity, .. }
            | Self::AbnormalClosure { severity, .. }
            | Self::AuthenticationFailure { severity, .. }
            | Self::ReconnectExhausted { severity, .. } => *severity,
        }
    }

    /// Returns the client identifier, if tagged.
    #[must_use]
    pub fn client_id(&self) -> Option<&str> {
        match self {
            Self::ReconnectScheduled { client_id, .. }
            | Self::AbnormalClosure { client_id, .. }
            | Self::AuthenticationFailure { client_id, .. }
            | Self::ReconnectExhausted { client_id, .. } => client_id.as_deref(),
        }
    }

    /// Returns the event type as a string.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::ReconnectScheduled { .. } => "reconnect_scheduled",
            Self::AbnormalClosure { .. } => "abnormal_closure",
            Self::AuthenticationFailure { .. } => "authentication_failure",
            Self::ReconnectExhausted { .. } => "reconnect_exhausted",
        }
    }

    /// Serializes the event to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(AuditError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn severity_ordering() {
        assert!(Severity::Info < Severity::Low);
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn severity_serialization() {
        let json = serde_json::to_string(&Severity::Medium).unwrap();
        assert_eq!(json, "\"medium\"");
    }

    #[test_case(AuditEvent::reconnect_scheduled(2, 2250), "reconnect_scheduled", Severity::Low)]
    #[test_case(AuditEvent::abnormal_closure(Some(1006), "reset"), "abnormal_closure", Severity::Medium)]
    #[test_case(AuditEvent::authentication_failure("expired"), "authentication_failure", Severity::High)]
    #[test_case(AuditEvent::reconnect_exhausted(10), "reconnect_exhausted", Severity::High)]
    fn event_type_and_severity(event: AuditEvent, event_type: &str, severity: Severity) {
        assert_eq!(event.event_type(), event_type);
        assert_eq!(event.severity(), severity);
    }

    #[test]
    fn with_client_id_tags_event() {
        let event = AuditEvent::abnormal_closure(None, "socket error").with_client_id("crm-web");
        assert_eq!(event.client_id(), Some("crm-web"));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = AuditEvent::reconnect_scheduled(0, 1100).with_client_id("crm-web");
        let json = event.to_json().unwrap();
        assert!(json.contains("\"type\":\"reconnect_scheduled\""));

        let parsed: AuditEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.event_id(), event.event_id());
    }
}
