//! Bounded exponential backoff for transient checkout failures.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Retry schedule: `base * 2^(attempt-1)` with uniform jitter, bounded by a
/// fixed attempt budget. Exceeding the budget surfaces a recoverable error
/// to the caller instead of hanging.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy from configuration.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay,
        }
    }

    /// Total attempts including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempt` (1-based) has a retry left after it.
    #[must_use]
    pub const fn has_next(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to sleep after failed attempt `attempt` (1-based).
    ///
    /// A server-suggested `retry_after` takes precedence over the computed
    /// backoff when it is longer; jitter of up to half the delay is added so
    /// concurrent retries do not stampede.
    #[must_use]
    pub fn delay_after(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1_u32 << exponent);
        let delay = retry_after.map_or(backoff, |suggested| suggested.max(backoff));

        let half = delay.as_millis() / 2;
        let jitter = if half == 0 {
            0
        } else {
            rand::rng().random_range(0..=half)
        };
        delay + Duration::from_millis(u64::try_from(jitter).unwrap_or(0))
    }
}
