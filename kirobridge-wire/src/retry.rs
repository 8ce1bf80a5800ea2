//! Retry strategies for protocol requests.

use std::time::Duration;

use crate::error::WireError;

/// Strategy for retrying failed requests.
///
/// Only transient failures are eligible; credential-health signals
/// (`Unauthorized`, `Suspended`, `QuotaExceeded`) and decode failures are
/// never retried at this layer.
#[derive(Debug, Clone)]
pub struct RetryStrategy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay between retries in seconds.
    pub base_delay_secs: u64,
    /// Whether to use exponential backoff.
    pub exponential_backoff: bool,
    /// Maximum delay between retries.
    pub max_delay_secs: u64,
}

impl RetryStrategy {
    /// Creates a new retry strategy.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay_secs: 1,
            exponential_backoff: false,
            max_delay_secs: 60,
        }
    }

    /// Disables retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay_secs: 0,
            exponential_backoff: false,
            max_delay_secs: 0,
        }
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, secs: u64) -> Self {
        self.base_delay_secs = secs;
        self
    }

    /// Enables or disables exponential backoff.
    pub fn with_exponential_backoff(mut self, enabled: bool) -> Self {
        self.exponential_backoff = enabled;
        self
    }

    /// Calculates the delay for a given attempt number (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = if self.exponential_backoff {
            self.base_delay_secs
                .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        } else {
            self.base_delay_secs
        };

        Duration::from_secs(delay.min(self.max_delay_secs))
    }

    /// Determines whether an error should be retried.
    pub fn should_retry(&self, error: &WireError) -> bool {
        error.is_transient()
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::new(3)
    }
}
