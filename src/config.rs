//! Configuration types for the delivery scheduler.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PhrasecastError, Result};
use crate::interval::{
    ACTIVE_END_HOUR, ACTIVE_START_HOUR, ActiveWindow, IntervalCalculator, MIN_INTERVAL_MINUTES,
};
use crate::scheduler::RetryPolicy;
use crate::surface::SurfaceKey;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhrasecastConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Cadence, tick budget and retry settings.
    pub schedule: ScheduleConfig,
    /// Rendering boundary settings.
    pub dispatch: DispatchConfig,
    /// Durable key-value store settings.
    pub storage: StorageConfig,
    /// Content catalog settings.
    pub catalog: CatalogConfig,
    /// Surfaces registered at startup with their default cadence.
    pub surfaces: Vec<SurfaceEntry>,
}

impl Default for PhrasecastConfig {
    fn default() -> Self {
        Self {
            log_filter: "phrasecast=info".to_owned(),
            schedule: ScheduleConfig::default(),
            dispatch: DispatchConfig::default(),
            storage: StorageConfig::default(),
            catalog: CatalogConfig::default(),
            surfaces: vec![
                SurfaceEntry::new("main", 1),
                SurfaceEntry::new("list", 3),
                SurfaceEntry::new("hero", 1),
            ],
        }
    }
}

/// Scheduling settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Start of the daily delivery window, hour of day.
    pub active_start_hour: u8,
    /// End of the daily delivery window (exclusive), hour of day.
    pub active_end_hour: u8,
    /// Minimum minutes between ticks. Never lower than 15.
    pub min_interval_minutes: u32,
    /// Wall-clock budget for one tick attempt.
    pub tick_timeout_secs: u64,
    /// Attempts per tick, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff_secs: u64,
    /// Upper bound for any retry delay.
    pub max_backoff_secs: u64,
    /// Backoff multiplier.
    pub backoff_factor: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            active_start_hour: ACTIVE_START_HOUR,
            active_end_hour: ACTIVE_END_HOUR,
            min_interval_minutes: MIN_INTERVAL_MINUTES,
            tick_timeout_secs: 30,
            max_attempts: 3,
            initial_backoff_secs: 30,
            max_backoff_secs: 900,
            backoff_factor: 2.0,
        }
    }
}

impl ScheduleConfig {
    /// Interval calculator for the configured window and floor.
    pub fn calculator(&self) -> IntervalCalculator {
        IntervalCalculator::new(
            ActiveWindow {
                start_hour: self.active_start_hour,
                end_hour: self.active_end_hour,
            },
            self.min_interval_minutes,
        )
    }

    /// Retry policy for failed ticks.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.initial_backoff_secs),
            Duration::from_secs(self.max_backoff_secs),
            self.backoff_factor,
        )
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_secs(self.tick_timeout_secs)
    }
}

/// Rendering boundary settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Per-dispatch acknowledgement timeout.
    pub timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Durable store settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path. Defaults to `<data_dir>/phrasecast.db`.
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured database path or the platform default.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(crate::paths::database_file)
    }
}

/// Content catalog settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// JSON catalog to load instead of the bundled one.
    pub path: Option<PathBuf>,
}

/// A surface registered at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceEntry {
    pub key: String,
    pub items_per_day: i64,
}

impl SurfaceEntry {
    pub fn new(key: impl Into<String>, items_per_day: i64) -> Self {
        Self {
            key: key.into(),
            items_per_day,
        }
    }
}

impl PhrasecastConfig {
    /// Load configuration from a TOML file and validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| PhrasecastError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when it exists, otherwise the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| PhrasecastError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config_dir>/config.toml`.
    pub fn default_config_path() -> PathBuf {
        crate::paths::config_file()
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let schedule = &self.schedule;
        if schedule.active_end_hour > 24 || schedule.active_end_hour <= schedule.active_start_hour {
            return Err(PhrasecastError::Config(format!(
                "active window {}:00-{}:00 is empty or out of range",
                schedule.active_start_hour, schedule.active_end_hour
            )));
        }
        if schedule.max_attempts == 0 {
            return Err(PhrasecastError::Config(
                "schedule.max_attempts must be at least 1".to_owned(),
            ));
        }
        if schedule.min_interval_minutes == 0 {
            return Err(PhrasecastError::Config(
                "schedule.min_interval_minutes must be at least 1".to_owned(),
            ));
        }
        if self.surfaces.iter().any(|s| s.key.trim().is_empty()) {
            return Err(PhrasecastError::Config("surface key must not be empty".to_owned()));
        }
        Ok(())
    }

    /// Startup surfaces as `(key, default items per day)`.
    pub fn surface_defaults(&self) -> Vec<(SurfaceKey, i64)> {
        self.surfaces
            .iter()
            .map(|s| (SurfaceKey::new(s.key.as_str()), s.items_per_day))
            .collect()
    }
}
