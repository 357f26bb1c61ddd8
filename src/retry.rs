//! Bounded retries around external collaborator calls.

use std::thread;
use std::time::Duration;

use crate::config::ProviderConfig;
use crate::error::{IndexError, IndexResult, ProviderError};

/// Largest exponent applied to the base backoff.
const MAX_BACKOFF_DOUBLINGS: u32 = 5;

/// How often and how patiently a failing collaborator is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `call` until it succeeds or the attempts are used up.
    ///
    /// # Errors
    /// `ProviderFailure` carrying the last error and the number of attempts.
    pub fn run<T>(
        &self,
        provider: &'static str,
        mut call: impl FnMut() -> Result<T, ProviderError>,
    ) -> IndexResult<T> {
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    tracing::warn!(
                        "{provider} failed (attempt {attempt}/{}): {err}",
                        self.max_attempts
                    );
                    thread::sleep(self.backoff_for(attempt));
                    attempt += 1;
                }
                Err(err) => {
                    return Err(IndexError::ProviderFailure {
                        provider,
                        attempts: attempt,
                        cause: err.to_string(),
                    });
                }
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(MAX_BACKOFF_DOUBLINGS);
        self.backoff * (1 << doublings)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ProviderConfig::default())
    }
}

impl From<&ProviderConfig> for RetryPolicy {
    fn from(config: &ProviderConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }
}
