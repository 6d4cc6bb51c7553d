//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Retry policy for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for each further retry.
    pub multiplier: f64,

    /// Retries allowed before the error is handed to the caller.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-indexed).
    ///
    /// delay = base_delay * multiplier^(retry - 1), so the defaults give
    /// 2s, 4s, 8s.
    pub fn next_delay(&self, retry: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(retry.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay_secs)
    }
}
