//! Database configuration
//!
//! Loaded from a JSON file. Only `data_dir` is required.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::observability::Level;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        "PHYSLOG_CONFIG_INVALID"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding the log file
    pub data_dir: PathBuf,

    #[serde(default = "default_log_file_name")]
    pub log_file_name: String,

    /// fsync after every appended batch
    #[serde(default = "default_sync_on_append")]
    pub sync_on_append: bool,

    /// Attempts a connection makes to acquire a guard before reporting busy
    #[serde(default = "default_lock_retry_attempts")]
    pub lock_retry_attempts: u32,

    /// Base backoff between attempts, doubled each time
    #[serde(default = "default_lock_retry_base_ms")]
    pub lock_retry_base_ms: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_file_name() -> String {
    "physlog.log".to_string()
}
fn default_sync_on_append() -> bool {
    true
}
fn default_lock_retry_attempts() -> u32 {
    5
}
fn default_lock_retry_base_ms() -> u64 {
    2
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl DatabaseConfig {
    /// Configuration with every default, rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            log_file_name: default_log_file_name(),
            sync_on_append: default_sync_on_append(),
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_retry_base_ms: default_lock_retry_base_ms(),
            log_level: default_log_level(),
        }
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: DatabaseConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir must not be empty".into()));
        }
        if self.log_file_name.is_empty() || self.log_file_name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "log_file_name '{}' must be a plain file name",
                self.log_file_name
            )));
        }
        if !(1..=100).contains(&self.lock_retry_attempts) {
            return Err(ConfigError::Invalid(format!(
                "lock_retry_attempts must be between 1 and 100, got {}",
                self.lock_retry_attempts
            )));
        }
        self.level()?;
        Ok(())
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(&self.log_file_name)
    }

    pub fn level(&self) -> ConfigResult<Level> {
        self.log_level.parse().map_err(ConfigError::Invalid)
    }
}
