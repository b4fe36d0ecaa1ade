//! Agent configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no file
//! at all) yields a working configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::executor::DEFAULT_JOB_TIMEOUT;

/// File name looked up in the platform config directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Which message bus hosts the service manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// The system instance.
    #[default]
    System,
    /// The per-user instance.
    Session,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default)]
    pub bus: BusKind,

    /// Seconds to wait for a start/stop job. `0` waits indefinitely.
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Default manifest file or directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifests: Option<PathBuf>,

    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,

    /// First delay before `watch` retries a pass that failed on the transport.
    #[serde(default = "default_retry_initial_secs")]
    pub retry_initial_secs: u64,

    /// Upper bound for the doubling retry delay.
    #[serde(default = "default_retry_max_secs")]
    pub retry_max_secs: u64,

    #[serde(default)]
    pub log: LogSettings,
}

fn default_job_timeout_secs() -> u64 {
    DEFAULT_JOB_TIMEOUT.as_secs()
}

fn default_watch_debounce_ms() -> u64 {
    500
}

fn default_retry_initial_secs() -> u64 {
    5
}

fn default_retry_max_secs() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::default(),
            job_timeout_secs: default_job_timeout_secs(),
            manifests: None,
            watch_debounce_ms: default_watch_debounce_ms(),
            retry_initial_secs: default_retry_initial_secs(),
            retry_max_secs: default_retry_max_secs(),
            log: LogSettings::default(),
        }
    }
}

impl AgentConfig {
    /// The job timeout handed to the executor.
    pub fn job_timeout(&self) -> Option<Duration> {
        match self.job_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    pub fn retry_initial(&self) -> Duration {
        Duration::from_secs(self.retry_initial_secs)
    }

    pub fn retry_max(&self) -> Duration {
        Duration::from_secs(self.retry_max_secs)
    }

    /// Default config file location, e.g. `~/.config/unitsync/config.yaml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("unitsync").join(CONFIG_FILE_NAME))
    }

    /// Loads the config from `path`, or from the default location, or falls
    /// back to defaults when no file exists there.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => load_config(path),
            None => match Self::default_path() {
                Some(default) if default.is_file() => load_config(&default),
                _ => {
                    log::debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AgentConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<AgentConfig, ConfigError> {
    let config: AgentConfig = if content.trim().is_empty() {
        AgentConfig::default()
    } else {
        serde_yaml::from_str(content)?
    };

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &AgentConfig) -> Result<(), ConfigError> {
    const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];
    if !LEVELS.contains(&config.log.level.to_lowercase().as_str()) {
        return Err(ConfigError::Validation {
            message: format!("Unsupported log level: {}", config.log.level),
        });
    }

    if config.watch_debounce_ms == 0 {
        return Err(ConfigError::Validation {
            message: "watchDebounceMs must be greater than zero".to_string(),
        });
    }

    if config.retry_initial_secs == 0 {
        return Err(ConfigError::Validation {
            message: "retryInitialSecs must be greater than zero".to_string(),
        });
    }

    if config.retry_max_secs < config.retry_initial_secs {
        return Err(ConfigError::Validation {
            message: format!(
                "retryMaxSecs ({}) must not be below retryInitialSecs ({})",
                config.retry_max_secs, config.retry_initial_secs
            ),
        });
    }

    Ok(())
}
