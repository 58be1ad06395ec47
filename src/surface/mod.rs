//! Display surfaces and their delivery cadence.

pub mod registry;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::interval::{IntervalCalculator, clamp_items_per_day};

pub use registry::{SurfaceChange, SurfaceRegistry};

/// Identifier of a surface kind (`"main"`, `"list"`, `"hero"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceKey(String);

impl SurfaceKey {
    /// Create a key; surrounding whitespace is trimmed.
    pub fn new(key: impl Into<String>) -> Self {
        let key: String = key.into();
        Self(key.trim().to_owned())
    }

    /// The primary single-sentence surface.
    pub fn main() -> Self {
        Self::new("main")
    }

    /// The multi-sentence list surface.
    pub fn list() -> Self {
        Self::new("list")
    }

    /// The large hero surface.
    pub fn hero() -> Self {
        Self::new("hero")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SurfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SurfaceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Cadence and bookkeeping for one surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceConfig {
    /// Surface identifier.
    pub key: SurfaceKey,
    /// Desired deliveries per day, always within `[1, 10]`.
    pub items_per_day: u32,
    /// Epoch milliseconds of the last successful update; 0 = never.
    pub last_update: u64,
}

impl SurfaceConfig {
    /// New never-updated surface; `items_per_day` is clamped.
    pub fn new(key: SurfaceKey, items_per_day: i64) -> Self {
        Self {
            key,
            items_per_day: clamp_items_per_day(items_per_day),
            last_update: 0,
        }
    }

    /// Whether the surface should be refreshed at `now_ms`.
    ///
    /// Due when never updated, or when at least one full interval has
    /// elapsed since the last update.
    pub fn is_due(&self, calculator: &IntervalCalculator, now_ms: u64) -> bool {
        if self.last_update == 0 {
            return true;
        }
        let interval_ms = calculator.millis_between_updates(i64::from(self.items_per_day));
        now_ms.saturating_sub(self.last_update) >= interval_ms
    }

    /// Earliest epoch millisecond at which the surface is due again.
    pub fn next_due_at(&self, calculator: &IntervalCalculator) -> u64 {
        if self.last_update == 0 {
            return 0;
        }
        self.last_update
            .saturating_add(calculator.millis_between_updates(i64::from(self.items_per_day)))
    }
}
