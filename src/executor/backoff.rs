use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff schedule for retryable operations.
///
/// `delay_for(n)` for attempt `n >= 1` is
/// `min(initial_delay * multiplier^(n-1), max_delay)`. The policy is pure
/// and deterministic; callers own the actual sleeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Delay before the first retry, in milliseconds.
    pub initial_delay_ms: u64,
    /// Multiplier applied for each subsequent attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay to wait before executing attempt `attempt` (1-based).
    ///
    /// Attempt 1 is the initial delay; attempt 0 is treated as 1 so a
    /// degenerate caller never underflows the exponent.
    #[inline]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let delay = (self.initial_delay_ms as f64) * self.multiplier.powi(exponent as i32);
        let capped = delay.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}
