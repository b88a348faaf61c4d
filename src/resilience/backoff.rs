//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// Calculate exponential backoff delay with jitter.
///
/// `attempt` is the number of attempts already made: 1 → `base`, 2 → `2 × base`, ...
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Jitter: 0 to 10% of the delay
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Retry schedule for store operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
}

impl BackoffPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_ms, self.max_ms)
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_ms: config.base_delay_ms,
            max_ms: config.max_delay_ms,
        }
    }
}
