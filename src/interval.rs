//! Delivery cadence arithmetic.
//!
//! Converts a surface's "items per day" into a wall-clock interval and into
//! the canonical list of hour offsets inside the active window.
//!
//! ```text
//! 06:00 ─────────────── 16h active window ─────────────── 22:00
//!        3/day: +1h          +6h          +11h
//! ```
//!
//! The interval is `active_window_minutes / clamp(items_per_day, 1, 10)`,
//! floored at [`MIN_INTERVAL_MINUTES`] because the periodic-execution
//! facility cannot run more often than that.

use chrono::NaiveTime;

/// Lowest accepted items-per-day value.
pub const MIN_ITEMS_PER_DAY: u32 = 1;

/// Highest accepted items-per-day value.
pub const MAX_ITEMS_PER_DAY: u32 = 10;

/// Platform floor for periodic execution (minutes).
pub const MIN_INTERVAL_MINUTES: u32 = 15;

/// Start of the default active window (hour of day).
pub const ACTIVE_START_HOUR: u8 = 6;

/// End of the default active window (hour of day, exclusive).
pub const ACTIVE_END_HOUR: u8 = 22;

/// Hand-curated hour offsets for each items-per-day value (index = n - 1).
///
/// Offsets are relative to the window start and chosen to read evenly to a
/// person, not to divide the window exactly.
const SCHEDULE_OFFSETS: [&[u8]; 10] = [
    &[2],
    &[2, 10],
    &[1, 6, 11],
    &[0, 4, 8, 12],
    &[0, 3, 6, 9, 12],
    &[0, 3, 6, 9, 12, 15],
    &[0, 2, 4, 6, 8, 10, 12],
    &[0, 2, 4, 6, 8, 10, 12, 14],
    &[0, 1, 3, 5, 7, 9, 11, 13, 15],
    &[0, 1, 2, 4, 6, 8, 10, 12, 14, 15],
];

/// Clamp an items-per-day value into `[1, 10]`.
#[must_use]
pub fn clamp_items_per_day(items_per_day: i64) -> u32 {
    // Bounds are tiny, the cast cannot truncate after clamping.
    items_per_day.clamp(i64::from(MIN_ITEMS_PER_DAY), i64::from(MAX_ITEMS_PER_DAY)) as u32
}

/// Daily window during which deliveries are spread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    /// Window start, hour of day.
    pub start_hour: u8,
    /// Window end, hour of day (exclusive).
    pub end_hour: u8,
}

impl Default for ActiveWindow {
    fn default() -> Self {
        Self {
            start_hour: ACTIVE_START_HOUR,
            end_hour: ACTIVE_END_HOUR,
        }
    }
}

impl ActiveWindow {
    /// Window length in minutes. Zero when the window is inverted.
    #[must_use]
    pub fn minutes(&self) -> u32 {
        u32::from(self.end_hour.saturating_sub(self.start_hour)) * 60
    }

    /// Window start as a wall-clock time.
    #[must_use]
    pub fn start_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(u32::from(self.start_hour.min(23)), 0, 0).unwrap_or(NaiveTime::MIN)
    }
}

/// Interval calculator bound to an active window and a platform floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalCalculator {
    window: ActiveWindow,
    floor_minutes: u32,
}

impl Default for IntervalCalculator {
    fn default() -> Self {
        Self {
            window: ActiveWindow::default(),
            floor_minutes: MIN_INTERVAL_MINUTES,
        }
    }
}

impl IntervalCalculator {
    /// Create a calculator for a custom window and floor.
    ///
    /// The floor never drops below [`MIN_INTERVAL_MINUTES`].
    #[must_use]
    pub fn new(window: ActiveWindow, floor_minutes: u32) -> Self {
        Self {
            window,
            floor_minutes: floor_minutes.max(MIN_INTERVAL_MINUTES),
        }
    }

    /// The active window in use.
    #[must_use]
    pub fn window(&self) -> ActiveWindow {
        self.window
    }

    /// The minimum interval in minutes.
    #[must_use]
    pub fn floor_minutes(&self) -> u32 {
        self.floor_minutes
    }

    /// Minutes between two updates of a surface delivering `items_per_day`.
    #[must_use]
    pub fn minutes_between_updates(&self, items_per_day: i64) -> u32 {
        let n = clamp_items_per_day(items_per_day);
        (self.window.minutes() / n).max(self.floor_minutes)
    }

    /// Same as [`Self::minutes_between_updates`], in milliseconds.
    #[must_use]
    pub fn millis_between_updates(&self, items_per_day: i64) -> u64 {
        u64::from(self.minutes_between_updates(items_per_day)) * 60_000
    }

    /// Wall-clock delivery times for `items_per_day` inside the window.
    ///
    /// Offsets that fall outside a shortened custom window are dropped.
    #[must_use]
    pub fn schedule_times(&self, items_per_day: i64) -> Vec<NaiveTime> {
        let start = self.window.start_time();
        let window_hours = self.window.end_hour.saturating_sub(self.window.start_hour);
        schedule_offsets(items_per_day)
            .iter()
            .filter(|offset| **offset < window_hours)
            .map(|offset| start + chrono::Duration::hours(i64::from(*offset)))
            .collect()
    }
}

/// Minutes between updates using the default 06:00–22:00 window.
#[must_use]
pub fn minutes_between_updates(items_per_day: i64) -> u32 {
    IntervalCalculator::default().minutes_between_updates(items_per_day)
}

/// Canonical hour offsets (relative to window start) for `items_per_day`.
///
/// Values outside `[1, 10]` are clamped before lookup.
#[must_use]
pub fn schedule_offsets(items_per_day: i64) -> &'static [u8] {
    let n = clamp_items_per_day(items_per_day) as usize;
    SCHEDULE_OFFSETS.get(n - 1).copied().unwrap_or(SCHEDULE_OFFSETS[0])
}

/// Human-readable cadence, e.g. `"every 4 hours"`.
#[must_use]
pub fn cadence_label(items_per_day: i64) -> String {
    match clamp_items_per_day(items_per_day) {
        1 => "once a day".to_owned(),
        2 => "twice a day".to_owned(),
        _ => {
            let minutes = minutes_between_updates(items_per_day);
            let (hours, rest) = (minutes / 60, minutes % 60);
            if rest == 0 {
                format!("every {hours} hours")
            } else {
                format!("every {hours}h {rest}m")
            }
        }
    }
}
