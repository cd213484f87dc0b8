//! Reconnection configuration and exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_interval: Duration,
    /// Multiplier applied per attempt.
    pub decay: f64,
    /// Maximum delay before jitter.
    pub max_interval: Duration,
    /// Maximum number of reconnection attempts (None = infinite).
    pub max_attempts: Option<u32>,
    /// Upper bound of the random extra delay, as a fraction of the delay.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            decay: 1.5,
            max_interval: Duration::from_secs(30),
            max_attempts: None,
            jitter: 0.3,
        }
    }
}

impl ReconnectConfig {
    /// Delay for the given zero-based attempt, before jitter.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_interval, self.max_interval, self.decay)
    }

    /// Delay for the given attempt with up to `jitter` of random extra delay.
    ///
    /// Jitter spreads out clients that lost their connection at the same
    /// moment so they do not reconnect in lockstep.
    pub fn jittered_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        let fraction = if self.jitter > 0.0 {
            rng.gen_range(0.0..self.jitter)
        } else {
            0.0
        };
        base + Duration::from_millis((base.as_millis() as f64 * fraction) as u64)
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    #[must_use]
    pub const fn should_reconnect(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }
}

/// Exponential backoff: `min(initial * multiplier^attempt, max)`,
/// truncated to whole milliseconds.
#[must_use]
pub fn calculate_backoff(
    attempt: u32,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
) -> Duration {
    let factor = multiplier.powi(attempt.min(i32::MAX as u32) as i32);
    let delay_millis = initial_delay.as_millis() as f64 * factor;
    if !delay_millis.is_finite() || delay_millis >= max_delay.as_millis() as f64 {
        return max_delay;
    }
    Duration::from_millis(delay_millis as u64)
}
