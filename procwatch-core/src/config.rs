//! Configuration (TOML)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for every duration setting: one year.
const MAX_DURATION_SECS: f64 = 365.0 * 24.0 * 3600.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Every tunable of the engine. Built once and handed to each component by
/// value; nothing mutates it afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub detection: DetectionConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: f64,
    pub join_timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    pub history_size: usize,
    pub cpu_high_threshold: f64,
    /// Megabytes.
    pub memory_high_threshold: f64,
    pub anomaly_multiplier: f64,
    /// Megabytes per sample.
    pub memory_leak_slope: f64,
    pub spike_multiplier: f64,
    pub insights_cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub terminate_timeout_secs: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10.0,
            join_timeout_secs: 2.0,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            history_size: 20,
            cpu_high_threshold: 50.0,
            memory_high_threshold: 500.0,
            anomaly_multiplier: 2.5,
            memory_leak_slope: 10.0,
            spike_multiplier: 3.0,
            insights_cooldown_secs: 30,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            terminate_timeout_secs: 3.0,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        seconds(self.interval_secs)
    }

    pub fn join_timeout(&self) -> Duration {
        seconds(self.join_timeout_secs)
    }
}

impl DetectionConfig {
    pub fn insights_cooldown(&self) -> chrono::Duration {
        let secs = self.insights_cooldown_secs.min(MAX_DURATION_SECS as u64);
        chrono::Duration::seconds(secs as i64)
    }
}

impl ControllerConfig {
    pub fn terminate_timeout(&self) -> Duration {
        seconds(self.terminate_timeout_secs)
    }
}

/// Out-of-range values saturate instead of panicking; `validate` reports them.
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.min(MAX_DURATION_SECS)).unwrap_or(Duration::ZERO)
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(path, content).map_err(write_error)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let seconds = [
            ("monitor.interval_secs", self.monitor.interval_secs),
            ("monitor.join_timeout_secs", self.monitor.join_timeout_secs),
            ("controller.terminate_timeout_secs", self.controller.terminate_timeout_secs),
        ];
        for (name, value) in seconds {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!("{} must be a non-negative number", name)));
            }
            if value > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!("{} must not exceed one year", name)));
            }
        }
        if self.detection.insights_cooldown_secs as f64 > MAX_DURATION_SECS {
            return Err(ConfigError::Invalid(
                "detection.insights_cooldown_secs must not exceed one year".to_string(),
            ));
        }
        if self.monitor.interval_secs == 0.0 {
            return Err(ConfigError::Invalid("monitor.interval_secs must be positive".to_string()));
        }
        if self.detection.history_size < 2 {
            return Err(ConfigError::Invalid("detection.history_size must be at least 2".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.monitor.interval(), Duration::from_secs(10));
        assert_eq!(config.monitor.join_timeout(), Duration::from_secs(2));
        assert_eq!(config.detection.history_size, 20);
        assert_eq!(config.detection.anomaly_multiplier, 2.5);
        assert_eq!(config.detection.insights_cooldown(), chrono::Duration::seconds(30));
        assert_eq!(config.controller.terminate_timeout(), Duration::from_secs(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[detection]
cpu_high_threshold = 70.0
"#,
        )
        .unwrap();
        assert_eq!(config.detection.cpu_high_threshold, 70.0);
        assert_eq!(config.detection.history_size, 20);
        assert_eq!(config.monitor, MonitorConfig::default());
    }

    #[test]
    fn test_huge_durations_rejected_without_panicking() {
        let mut config = Config::default();
        config.monitor.interval_secs = 1e300;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        assert_eq!(config.monitor.interval(), Duration::from_secs(365 * 24 * 3600));

        let mut config = Config::default();
        config.controller.terminate_timeout_secs = f64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(config.controller.terminate_timeout(), Duration::from_secs(365 * 24 * 3600));

        let mut config = Config::default();
        config.detection.insights_cooldown_secs = u64::MAX;
        assert!(config.validate().is_err());
        assert_eq!(
            config.detection.insights_cooldown(),
            chrono::Duration::seconds(365 * 24 * 3600)
        );
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.monitor.interval_secs = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.detection.history_size = 1;
        assert!(config.validate().is_err());
    }
}
