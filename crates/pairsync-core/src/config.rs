//! Configuration module for PairSync.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for PairSync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub watch: WatchConfig,
    pub lease: LeaseConfig,
    pub logging: LoggingConfig,
}

/// Watcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Root directory of the local mirror.
    pub root: PathBuf,
    /// Seconds between remote change-summary polls.
    pub remote_poll_interval: u64,
    /// Seconds per idle-loop tick; the interruption signal is checked at
    /// this granularity.
    pub tick_interval: u64,
}

/// Processor lease settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Seconds before an untended lease lapses and the pair becomes
    /// reclaimable.
    pub ttl_secs: i64,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/pairsync/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("pairsync")
            .join("config.yaml")
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("PairSync"),
            remote_poll_interval: 30,
            tick_interval: 1,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"watch.tick_interval"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.watch.remote_poll_interval == 0 {
            errors.push(ValidationError {
                field: "watch.remote_poll_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.watch.tick_interval == 0 {
            errors.push(ValidationError {
                field: "watch.tick_interval".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !self.watch.root.is_absolute() {
            errors.push(ValidationError {
                field: "watch.root".into(),
                message: "must be an absolute path".into(),
            });
        }
        if self.lease.ttl_secs <= 0 {
            errors.push(ValidationError {
                field: "lease.ttl_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!("must be one of {VALID_LOG_LEVELS:?}"),
            });
        }

        errors
    }
}
