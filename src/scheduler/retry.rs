//! Retry with exponential backoff.
//!
//! Only errors classified as transient ([`PhrasecastError::is_retryable`])
//! are retried. Validation and invariant failures end the loop at once.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, warn};

use crate::error::Result;

/// Default number of attempts per tick.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one, at least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier applied after each retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(15 * 60),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy; `max_attempts` is raised to 1 and `backoff_factor` to 1.0.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            backoff_factor: if backoff_factor.is_finite() {
                backoff_factor.max(1.0)
            } else {
                1.0
            },
        }
    }

    /// Policy that never retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Delay after the given failed attempt (0-indexed).
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);

        // 2^31 is already far past any useful delay.
        let exp = attempt.min(31) as i32;
        let delay_ms = (initial_ms as f64) * self.backoff_factor.powi(exp);
        let delay_ms = delay_ms.min(max_ms as f64).max(0.0);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    /// Final success or last error.
    pub result: Result<T>,
    /// Attempts made, at least 1.
    pub attempts: u32,
    /// Time spent including backoff delays.
    pub elapsed: Duration,
}

/// Run `operation` until it succeeds, fails terminally or attempts run out.
pub async fn with_retry_outcome<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: attempt,
                    elapsed: start.elapsed(),
                };
            }
            Err(err) => err,
        };

        if !err.is_retryable() {
            error!(attempt, error = %err, "terminal failure, not retrying");
            return RetryOutcome {
                result: Err(err),
                attempts: attempt,
                elapsed: start.elapsed(),
            };
        }
        if attempt >= policy.max_attempts {
            error!(attempts = attempt, error = %err, "retries exhausted");
            return RetryOutcome {
                result: Err(err),
                attempts: attempt,
                elapsed: start.elapsed(),
            };
        }

        let delay = policy.delay_for_attempt(attempt - 1);
        warn!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// [`with_retry_outcome`] without the bookkeeping.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_outcome(policy, operation).await.result
}
