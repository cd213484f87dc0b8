//! Heartbeat/keepalive bookkeeping.
//!
//! The driver ticks a [`Heartbeat`] on its interval timer while connected and
//! feeds it every `pong`. The tracker decides when the connection is dead and
//! turns pongs into latency samples.

use std::time::Duration;

use switchboard_proto::{now_millis, ControlFrame, Frame};

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub interval: Duration,
    /// Number of unanswered pings before considering the connection dead.
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_missed: 3,
        }
    }
}

/// What to do on a heartbeat tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Send this ping.
    Ping(Frame),
    /// Too many pings went unanswered.
    Dead {
        /// Consecutive unanswered pings.
        missed: u32,
    },
}

/// Tracks unanswered pings for one connection.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    missed: u32,
}

impl Heartbeat {
    /// Create a tracker with no outstanding pings.
    #[must_use]
    pub const fn new(config: HeartbeatConfig) -> Self {
        Self { config, missed: 0 }
    }

    /// Configured interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.config.interval
    }

    /// Consecutive pings without a pong.
    #[must_use]
    pub const fn missed(&self) -> u32 {
        self.missed
    }

    /// Advance one interval.
    ///
    /// The ping sent on this tick counts as missed until a pong arrives.
    pub fn tick(&mut self) -> Tick {
        if self.config.max_missed > 0 && self.missed >= self.config.max_missed {
            return Tick::Dead {
                missed: self.missed,
            };
        }
        self.missed += 1;
        Tick::Ping(ControlFrame::ping())
    }

    /// Record a pong. Returns the round trip in milliseconds when the pong
    /// echoes a send timestamp.
    pub fn pong(&mut self, echoed: Option<i64>) -> Option<f64> {
        self.missed = 0;
        let sent = echoed?;
        let elapsed = now_millis().saturating_sub(sent);
        (elapsed >= 0).then_some(elapsed as f64)
    }

    /// Forget outstanding pings, for a new connection.
    pub fn reset(&mut self) {
        self.missed = 0;
    }
}
