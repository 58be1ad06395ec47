//! Periodic work facility.
//!
//! A [`PeriodicJob`] describes how often the tick entry point runs and how a
//! failed tick is retried. It enforces the platform minimum interval on its
//! own, independent of what the interval calculator already guarantees.

use std::future::Future;
use std::time::Duration;

use super::retry::{RetryOutcome, RetryPolicy, with_retry_outcome};
use crate::error::{PhrasecastError, Result};
use crate::interval::MIN_INTERVAL_MINUTES;

/// Wall-clock budget for one tick attempt.
pub const DEFAULT_TICK_TIMEOUT: Duration = Duration::from_secs(30);

/// Periodic job descriptor: interval, retry policy and per-attempt timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodicJob {
    interval_minutes: u32,
    retry: RetryPolicy,
    tick_timeout: Duration,
}

impl PeriodicJob {
    /// Create a job running every `interval_minutes` (at least 15).
    pub fn new(interval_minutes: u32, retry: RetryPolicy) -> Self {
        Self {
            interval_minutes: interval_minutes.max(MIN_INTERVAL_MINUTES),
            retry,
            tick_timeout: DEFAULT_TICK_TIMEOUT,
        }
    }

    /// Override the per-attempt timeout.
    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = timeout;
        self
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.interval_minutes) * 60)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn tick_timeout(&self) -> Duration {
        self.tick_timeout
    }

    /// Run one scheduled execution of `tick`, retrying transient failures.
    ///
    /// Each attempt is bounded by the tick timeout; an attempt that runs
    /// over fails with [`PhrasecastError::TickTimeout`].
    pub async fn execute<T, F, Fut>(&self, mut tick: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.tick_timeout;
        with_retry_outcome(&self.retry, || {
            let attempt = tick();
            async move {
                match tokio::time::timeout(timeout, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(PhrasecastError::TickTimeout(timeout)),
                }
            }
        })
        .await
    }
}
