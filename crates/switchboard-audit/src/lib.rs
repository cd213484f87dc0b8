//! # switchboard-audit
//!
//! Audit notifications for Switchboard sessions.
//!
//! The transport reports reconnect scheduling, abnormal closures,
//! authentication failures and reconnect exhaustion to an [`AuditSink`].
//! Sinks are fire-and-forget: nothing is returned to the transport.
//!
//! ## Example
//!
//! ```rust
//! use switchboard_audit::{AuditEvent, AuditSink, TracingAuditSink};
//!
//! let sink = TracingAuditSink::new();
//! sink.log(&AuditEvent::authentication_failure("token expired"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod sink;

pub use error::{AuditError, Result};
pub use events::{AuditEvent, Severity};
pub use sink::{AuditSink, NoopAuditSink, TracingAuditSink};
