//! Configuration for the fleet telemetry engine.

use crate::core::buckets::Granularity;
use crate::core::intervals::OpenIntervalMode;
use crate::telemetry::generator::{
    default_stations, default_units, Arena, ChargingStation, MobileUnit,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Synthetic generator settings
    pub simulation: SimulationConfig,

    /// Historical metric settings
    pub aggregation: AggregationConfig,

    /// Event log retention
    pub retention: RetentionConfig,

    /// Path for exported fleet reports
    pub export_path: PathBuf,

    /// Path for data-quality statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fleet-telemetry");

        Self {
            simulation: SimulationConfig::default(),
            aggregation: AggregationConfig::default(),
            retention: RetentionConfig::default(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fleet-telemetry")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.fast_tick.is_zero() || sim.slow_tick.is_zero() {
            return Err(ConfigError::Invalid("tick periods must be non-zero".into()));
        }
        if sim.arena.width <= 0.0 || sim.arena.height <= 0.0 {
            return Err(ConfigError::Invalid("arena must have a positive area".into()));
        }
        if self.aggregation.window_cap == 0 {
            return Err(ConfigError::Invalid("window_cap must be at least 1".into()));
        }
        if let Granularity::Seconds(0) = self.aggregation.granularity {
            return Err(ConfigError::Invalid("bucket granularity must be non-zero".into()));
        }
        if self.retention.capacity == 0 {
            return Err(ConfigError::Invalid("retention capacity must be at least 1".into()));
        }
        self.aggregation.label_tz()?;
        Ok(())
    }
}

/// Synthetic generator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Period of the mobile-unit tick (milliseconds)
    #[serde(with = "duration_ms")]
    pub fast_tick: Duration,
    /// Period of the station tick (milliseconds)
    #[serde(with = "duration_ms")]
    pub slow_tick: Duration,
    pub arena: Arena,
    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
    pub units: Vec<MobileUnit>,
    pub stations: Vec<ChargingStation>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fast_tick: Duration::from_millis(1000),
            slow_tick: Duration::from_millis(5000),
            arena: Arena::default(),
            seed: None,
            units: default_units(),
            stations: default_stations(),
        }
    }
}

/// Settings for interval and bucket queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub granularity: Granularity,
    /// Number of most recent buckets kept in a series
    pub window_cap: usize,
    pub open_interval: OpenIntervalMode,
    /// IANA timezone used for bucket labels
    pub label_timezone: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            granularity: Granularity::Minute,
            window_cap: 20,
            open_interval: OpenIntervalMode::LastEvent,
            label_timezone: "UTC".to_string(),
        }
    }
}

impl AggregationConfig {
    pub fn label_tz(&self) -> Result<Tz, ConfigError> {
        self.label_timezone.parse::<Tz>().map_err(|_| {
            ConfigError::Invalid(format!("unknown timezone '{}'", self.label_timezone))
        })
    }
}

/// Event log retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Maximum number of events held in memory
    pub capacity: usize,
    /// Events older than this (relative to the newest event) are evicted
    #[serde(with = "duration_secs")]
    pub max_age: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for millisecond durations.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Serde support for second durations.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
