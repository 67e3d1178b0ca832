// Retry logic for transient failures
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry decision result
#[derive(Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the given delay
    Retry(Duration),
    /// Attempts exhausted
    GiveUp,
}

/// Linear-backoff retry policy
///
/// `max_attempts` counts every attempt including the first one. Between
/// attempt `n` (0-based) and attempt `n + 1` the policy sleeps
/// `base_delay * (n + 1)`; nothing is slept after the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Arguments
    /// * `max_attempts` - Total attempts (clamped to at least 1)
    /// * `base_delay` - Delay unit multiplied by the attempt number
    ///
    /// # Example
    /// ```text
    /// let policy = RetryPolicy::new(3, Duration::from_secs(1));
    /// // attempt 0 fails -> sleep 1s, attempt 1 fails -> sleep 2s, attempt 2 fails -> give up
    /// ```
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decide what to do after `attempt` (0-based) failed
    pub fn should_retry(&self, attempt: u32) -> RetryDecision {
        if attempt + 1 >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry(self.base_delay.saturating_mul(attempt + 1))
    }

    /// Run `op` until it succeeds or attempts run out
    ///
    /// Failures are logged and degraded to `None`; callers that need the error
    /// itself should call `should_retry` directly.
    pub async fn retry_async<T, E, F, Fut>(&self, label: &str, mut op: F) -> Option<T>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Some(value),
                Err(e) => match self.should_retry(attempt) {
                    RetryDecision::Retry(delay) => {
                        debug!(
                            target_name = %label,
                            attempt = attempt + 1,
                            max_attempts = self.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    RetryDecision::GiveUp => {
                        warn!(
                            target_name = %label,
                            attempts = attempt + 1,
                            error = %e,
                            "All attempts failed"
                        );
                        return None;
                    }
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}
