//! Audit sink backends.
//!
//! This module provides the [`AuditSink`] trait and default implementations.

use std::sync::Arc;

use crate::events::{AuditEvent, Severity};

/// Destination for session audit events.
///
/// Implementations must not block: the transport calls `log` inline on its
/// event loop and ignores the outcome.
pub trait AuditSink: Send + Sync {
    /// Logs an audit event.
    fn log(&self, event: &AuditEvent);
}

/// Audit sink that uses the `tracing` infrastructure.
///
/// Events are logged at tracing levels based on severity:
/// - Info, Low → `tracing::info!`
/// - Medium → `tracing::warn!`
/// - High → `tracing::error!`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl TracingAuditSink {
    /// Creates a new tracing-based audit sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AuditSink for TracingAuditSink {
    fn log(&self, event: &AuditEvent) {
        let event_id = event.event_id();
        let event_type = event.event_type();
        let severity = event.severity();
        let client_id = event.client_id().unwrap_or("-");

        let json = event.to_json().unwrap_or_else(|_| "{}".to_string());

        match severity {
            Severity::Info | Severity::Low => {
                tracing::info!(
                    target: "switchboard_audit",
                    %event_id,
                    %severity,
                    client_id,
                    event_json = %json,
                    "[AUDIT] {event_type}"
                );
            }
            Severity::Medium => {
                tracing::warn!(
                    target: "switchboard_audit",
                    %event_id,
                    %severity,
                    client_id,
                    event_json = %json,
                    "[AUDIT] {event_type}"
                );
            }
            Severity::High => {
                tracing::error!(
                    target: "switchboard_audit",
                    %event_id,
                    %severity,
                    client_id,
                    event_json = %json,
                    "[AUDIT] {event_type}"
                );
            }
        }
    }
}

/// A no-op audit sink for tests or disabled auditing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

impl NoopAuditSink {
    /// Creates a new no-op audit sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl AuditSink for NoopAuditSink {
    fn log(&self, _event: &AuditEvent) {}
}

impl<T: AuditSink + ?Sized> AuditSink for Arc<T> {
    fn log(&self, event: &AuditEvent) {
        (**self).log(event);
    }
}
