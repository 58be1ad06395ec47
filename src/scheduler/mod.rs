//! Adaptive multi-surface delivery scheduler.
//!
//! One shared timer runs at the shortest interval any surface needs. Each
//! tick checks every surface for due-ness, selects content for the due ones
//! and dispatches it. A failed tick is retried by the [`PeriodicJob`] with
//! exponential backoff.

pub mod job;
pub mod report;
pub mod retry;
pub mod runner;

use std::fmt;

use serde::Serialize;

pub use job::{DEFAULT_TICK_TIMEOUT, PeriodicJob};
pub use report::{SurfaceOutcome, SurfaceReport, TickReport};
pub use retry::{RetryOutcome, RetryPolicy, with_retry, with_retry_outcome};
pub use runner::Scheduler;

/// Lifecycle of the shared delivery timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    /// No timer registered.
    #[default]
    Idle,
    /// Timer registered at the given interval.
    Scheduled { interval_minutes: u32 },
    /// A tick is being processed.
    Tick,
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Scheduled { interval_minutes } => {
                write!(f, "scheduled every {interval_minutes} min")
            }
            Self::Tick => f.write_str("ticking"),
        }
    }
}
