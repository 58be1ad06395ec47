//! Phrasecast: adaptive multi-surface delivery of short learning items.
//!
//! Each display surface asks for a number of items per day. The scheduler
//! turns those cadences into one shared timer, checks which surfaces are due
//! on every tick, picks content for them and pushes it through the
//! rendering boundary.
//!
//! # Architecture
//!
//! - **Interval calculator**: items per day → minutes between updates, plus
//!   the curated hour-offset table
//! - **Surface registry**: per-surface cadence and durable last-update time
//! - **Content store**: catalog with weighted tier/topic selection
//! - **Saved-item ledger**: observable bookmark set
//! - **Update dispatcher**: hands items to the rendering boundary
//! - **Scheduler**: shared timer, tick processing, retry with backoff

pub mod config;
pub mod content;
pub mod criteria;
pub mod dispatch;
pub mod error;
pub mod interval;
pub mod paths;
pub mod saved;
pub mod scheduler;
pub mod storage;
pub mod surface;

pub use config::PhrasecastConfig;
pub use content::{ContentItem, ContentStore, Tier};
pub use criteria::{CriteriaStore, UserCriteria};
pub use dispatch::{RenderingBoundary, UpdateDispatcher};
pub use error::{ErrorClass, PhrasecastError, Result};
pub use interval::IntervalCalculator;
pub use saved::SavedItemLedger;
pub use scheduler::{Scheduler, SchedulerState, TickReport};
pub use surface::{SurfaceConfig, SurfaceKey, SurfaceRegistry};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in epoch milliseconds.
///
/// Never returns 0, which surfaces read as "never updated": a clock set
/// before 1970 yields 1.
pub fn now_epoch_millis() -> u64 {
    epoch_millis(SystemTime::now())
}

fn epoch_millis(at: SystemTime) -> u64 {
    match at.duration_since(UNIX_EPOCH) {
        Ok(duration) => u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .max(1),
        Err(e) => {
            tracing::warn!(behind = ?e.duration(), "system clock is before 1970");
            1
        }
    }
}
