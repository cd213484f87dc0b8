//! Connection metrics.
//!
//! [`ConnectionMetrics`] owns the session's [`ConnectionState`]: the current
//! status, reconnect counter, traffic counters, recent errors and a rolling
//! window of heartbeat latency samples. It performs no I/O; the driver feeds
//! it and publishes [`ConnectionMetrics::snapshot`] to consumers.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of errors kept in the error history.
pub const DEFAULT_ERROR_HISTORY: usize = 50;

/// Lifecycle status of the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Token resolution or socket open in progress.
    Connecting,
    /// Socket open.
    Connected,
    /// Intentional close in progress.
    Disconnecting,
    /// No socket.
    #[default]
    Disconnected,
    /// Socket failed, or the session gave up (auth failure, attempts exhausted).
    Error,
}

impl ConnectionStatus {
    /// Returns the string representation of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Point-in-time view of the connection, handed to consumers by value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionState {
    /// Current status.
    pub status: ConnectionStatus,
    /// Consecutive reconnection attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// When the socket last opened.
    pub last_connected_at: Option<DateTime<Utc>>,
    /// When the socket last closed or failed.
    pub last_disconnected_at: Option<DateTime<Utc>>,
    /// Most recent transport error.
    pub last_error: Option<String>,
    /// Most recent heartbeat round trip.
    pub latency_ms: f64,
    /// Mean round trip over the latency window.
    pub average_latency_ms: f64,
    /// Frames written to the socket.
    pub messages_sent: u64,
    /// Frames read from the socket.
    pub messages_received: u64,
    /// Bytes written to the socket.
    pub bytes_sent: u64,
    /// Bytes read from the socket.
    pub bytes_received: u64,
    /// Low-priority messages evicted from a full queue.
    pub messages_evicted: u64,
}

impl ConnectionState {
    /// Whether the socket is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// A recorded transport error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// When the error was recorded.
    pub at: DateTime<Utc>,
    /// Error description.
    pub message: String,
}

/// Mutable owner of the connection state.
#[derive(Debug, Clone)]
pub struct ConnectionMetrics {
    state: ConnectionState,
    latency_samples: VecDeque<f64>,
    latency_window: usize,
    errors: VecDeque<ErrorRecord>,
    error_history: usize,
}

impl Default for ConnectionMetrics {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ConnectionMetrics {
    /// Create metrics keeping `latency_window` latency samples.
    #[must_use]
    pub fn new(latency_window: usize) -> Self {
        Self {
            state: ConnectionState::default(),
            latency_samples: VecDeque::with_capacity(latency_window),
            latency_window: latency_window.max(1),
            errors: VecDeque::new(),
            error_history: DEFAULT_ERROR_HISTORY,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        self.state.status
    }

    /// Update the status, stamping connect/disconnect times.
    ///
    /// Entering `Connected` zeroes the reconnect counter; nothing else does.
    pub fn set_status(&mut self, status: ConnectionStatus) {
        match status {
            ConnectionStatus::Connected => {
                self.state.last_connected_at = Some(Utc::now());
                self.state.reconnect_attempts = 0;
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Error
                if self.state.status != status =>
            {
                self.state.last_disconnected_at = Some(Utc::now());
            }
            _ => {}
        }
        self.state.status = status;
    }

    /// Reconnect attempts since the last successful open.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.state.reconnect_attempts
    }

    /// Mirror the reconnect counter from the state machine.
    pub fn set_reconnect_attempts(&mut self, attempts: u32) {
        self.state.reconnect_attempts = attempts;
    }

    /// Count one frame written.
    pub fn record_sent(&mut self, bytes: usize) {
        self.state.messages_sent += 1;
        self.state.bytes_sent += bytes as u64;
    }

    /// Count one frame read.
    pub fn record_received(&mut self, bytes: usize) {
        self.state.messages_received += 1;
        self.state.bytes_received += bytes as u64;
    }

    /// Count one evicted queue entry.
    pub fn record_eviction(&mut self) {
        self.state.messages_evicted += 1;
    }

    /// Record a transport error.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        if self.errors.len() == self.error_history {
            self.errors.pop_front();
        }
        self.errors.push_back(ErrorRecord {
            at: Utc::now(),
            message: message.clone(),
        });
        self.state.last_error = Some(message);
    }

    /// Recent errors, oldest first.
    pub fn errors(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.errors.iter()
    }

    /// Record a heartbeat round trip.
    pub fn record_latency(&mut self, latency_ms: f64) {
        if !latency_ms.is_finite() || latency_ms < 0.0 {
            return;
        }
        if self.latency_samples.len() == self.latency_window {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
        self.state.latency_ms = latency_ms;
        self.state.average_latency_ms = self.average_latency();
    }

    /// Latency samples in the window, oldest first.
    pub fn latency_samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.latency_samples.iter().copied()
    }

    /// Mean of the latency window, or 0 with no samples.
    #[must_use]
    pub fn average_latency(&self) -> f64 {
        if self.latency_samples.is_empty() {
            return 0.0;
        }
        self.latency_samples.iter().sum::<f64>() / self.latency_samples.len() as f64
    }

    /// An owned copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionState {
        self.state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let metrics = ConnectionMetrics::new(10);
        let state = metrics.snapshot();
        assert_eq!(state.status, ConnectionStatus::Disconnected);
        assert_eq!(state.reconnect_attempts, 0);
        assert!(state.last_connected_at.is_none());
        assert!(state.last_error.is_none());
        assert!(!state.is_connected());
    }

    #[test]
    fn test_connected_resets_attempts() {
        let mut metrics = ConnectionMetrics::new(10);
        metrics.set_reconnect_attempts(4);
        metrics.set_status(ConnectionStatus::Connecting);
        assert_eq!(metrics.reconnect_attempts(), 4);

        metrics.set_status(ConnectionStatus::Connected);
        assert_eq!(metrics.reconnect_attempts(), 0);
        assert!(metrics.snapshot().last_connected_at.is_some());
    }

    #[test]
    fn test_disconnect_stamps_time() {
        let mut metrics = ConnectionMetrics::new(10);
        metrics.set_status(ConnectionStatus::Connected);
        metrics.set_status(ConnectionStatus::Disconnected);
        assert!(metrics.snapshot().last_disconnected_at.is_some());
    }

    #[test]
    fn test_traffic_counters() {
        let mut metrics = ConnectionMetrics::new(10);
        metrics.record_sent(120);
        metrics.record_sent(30);
        metrics.record_received(64);
        metrics.record_eviction();

        let state = metrics.snapshot();
        assert_eq!(state.messages_sent, 2);
        assert_eq!(state.bytes_sent, 150);
        assert_eq!(state.messages_received, 1);
        assert_eq!(state.bytes_received, 64);
        assert_eq!(state.messages_evicted, 1);
    }

    #[test]
    fn test_error_history_is_bounded() {
        let mut metrics = ConnectionMetrics::new(10);
        for i in 0..(DEFAULT_ERROR_HISTORY + 5) {
            metrics.record_error(format!("error {i}"));
        }
        assert_eq!(metrics.errors().count(), DEFAULT_ERROR_HISTORY);
        assert_eq!(
            metrics.errors().next().map(|e| e.message.as_str()),
            Some("error 5")
        );
        assert_eq!(
            metrics.snapshot().last_error.as_deref(),
            Some(format!("error {}", DEFAULT_ERROR_HISTORY + 4).as_str())
        );
    }

    #[test]
    fn test_latency_window_rolls() {
        let mut metrics = ConnectionMetrics::new(3);
        for sample in [10.0, 20.0, 30.0, 40.0] {
            metrics.record_latency(sample);
        }

        let samples: Vec<f64> = metrics.latency_samples().collect();
        assert_eq!(samples, vec![20.0, 30.0, 40.0]);

        let state = metrics.snapshot();
        assert!((state.latency_ms - 40.0).abs() < f64::EPSILON);
        assert!((state.average_latency_ms - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latency_rejects_nonsense() {
        let mut metrics = ConnectionMetrics::new(3);
        metrics.record_latency(-5.0);
        metrics.record_latency(f64::NAN);
        assert_eq!(metrics.latency_samples().count(), 0);
        assert!(metrics.average_latency().abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut metrics = ConnectionMetrics::new(3);
        let before = metrics.snapshot();
        metrics.record_sent(10);
        assert_eq!(before.messages_sent, 0);
        assert_eq!(metrics.snapshot().messages_sent, 1);
    }
}
