use std::time::Duration;

use crate::errors::DepotError;

const DEFAULT_MAX_ATTEMPTS: usize = 3;
const DEFAULT_DELAY_MS: u64 = 2_000;

/// Bounded retry with a fixed pause between attempts
#[derive(Debug, Clone)]
pub struct RetryManager {
    max_attempts: usize,
    delay: Duration,
}

impl Default for RetryManager {
    fn default() -> Self {
        RetryManager::new(DEFAULT_MAX_ATTEMPTS, Duration::from_millis(DEFAULT_DELAY_MS))
    }
}

impl RetryManager {
    pub fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: if max_attempts == 0 {
                DEFAULT_MAX_ATTEMPTS
            } else {
                max_attempts
            },
            delay,
        }
    }

    /// Get the maximum number of attempts, the first one included
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Only transport failures are retried. Validation, serialization and
    /// topology errors would fail the same way on the next attempt.
    pub fn is_retryable_error(&self, error: &DepotError) -> bool {
        error.is_retryable()
    }

    /// Whether another attempt may follow `attempt` (1-based) failing with `error`
    pub fn should_retry(&self, attempt: usize, error: &DepotError) -> bool {
        attempt < self.max_attempts && self.is_retryable_error(error)
    }

    /// Pause before the attempt following `attempt`
    pub fn backoff(&self, _attempt: usize) -> Duration {
        self.delay
    }
}
