//! Bounded exponential backoff for tracker calls

use crate::error::{TrackerError, TrackerResult};
use crate::throttle::Throttle;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use vt_model::RetrySettings;

/// Retry policy for transient tracker failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Create policy
    #[inline]
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Policy that never retries
    #[inline]
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Whether a failed attempt (zero-based) should be retried
    ///
    /// A rate limit asking for a longer wait than `max_delay` is not retried.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &TrackerError) -> bool {
        attempt + 1 < self.max_attempts
            && error.is_retryable()
            && retry_after(error).map_or(true, |wait| wait <= self.max_delay)
    }

    /// Delay before retrying after a failed attempt (zero-based)
    ///
    /// A rate limit with `Retry-After` waits exactly that long; everything
    /// else doubles from the base delay, capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &TrackerError) -> Duration {
        match retry_after(error) {
            Some(wait) => wait,
            None => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt.min(16)))
                .min(self.max_delay),
        }
    }

    /// Run an operation, retrying transient failures
    ///
    /// Every attempt first waits for the shared throttle. Rate-limited
    /// failures extend the throttle so that all workers back off together.
    ///
    /// # Errors
    /// The first terminal error, or `RetriesExhausted` wrapping the last
    /// transient one.
    pub async fn execute<F, Fut, T>(
        &self,
        operation: &str,
        throttle: &Throttle,
        mut f: F,
    ) -> TrackerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TrackerResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            throttle.wait().await;
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation, attempts = attempt + 1, "tracker call succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) if self.should_retry(attempt, &error) => {
                    let delay = self.delay_for(attempt, &error);
                    debug!(
                        operation,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying tracker call"
                    );
                    if error.is_rate_limited() {
                        throttle.pause_for(delay);
                    } else {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) if error.is_retryable() => {
                    if let Some(wait) = retry_after(&error) {
                        throttle.pause_for(wait);
                    }
                    warn!(operation, attempts = attempt + 1, error = %error, "tracker call retries exhausted");
                    return Err(TrackerError::RetriesExhausted {
                        attempts: attempt + 1,
                        last: Box::new(error),
                    });
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Wait requested by a rate-limit response
fn retry_after(error: &TrackerError) -> Option<Duration> {
    match error {
        TrackerError::RateLimited { retry_after } => *retry_after,
        _ => None,
    }
}
