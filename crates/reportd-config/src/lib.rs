use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Largest UTC offset chrono accepts, in minutes.
const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between two ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound for a single render or deliver call, in seconds.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Maximum number of jobs executed concurrently within one tick.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Offset of the reference timezone used to interpret `time_of_day`.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_execution_timeout_secs() -> u64 {
    30
}

fn default_max_concurrent_runs() -> usize {
    4
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            max_concurrent_runs: default_max_concurrent_runs(),
            utc_offset_minutes: 0,
        }
    }
}

/// Where jobs and run history are persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file. Defaults to `~/.reportd/reportd.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Keep everything in memory (nothing survives a restart).
    #[serde(default)]
    pub in_memory: bool,
}

/// Directory used by the bundled outbox deliverer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Defaults to `~/.reportd/outbox`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// Top-level reportd configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportdConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
}

impl ReportdConfig {
    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if s.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.tick_interval_secs must be positive".into(),
            ));
        }
        if s.execution_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.execution_timeout_secs must be positive".into(),
            ));
        }
        if s.max_concurrent_runs == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrent_runs must be positive".into(),
            ));
        }
        if s.utc_offset_minutes.abs() >= MAX_UTC_OFFSET_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "scheduler.utc_offset_minutes out of range: {}",
                s.utc_offset_minutes
            )));
        }
        Ok(())
    }

    /// Resolved database path, or `None` for in-memory storage.
    pub fn database_path(&self) -> Result<Option<PathBuf>, ConfigError> {
        if self.storage.in_memory {
            return Ok(None);
        }
        match &self.storage.path {
            Some(p) => Ok(Some(p.clone())),
            None => Ok(Some(config_dir()?.join("reportd.db"))),
        }
    }

    pub fn outbox_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.outbox.dir {
            Some(d) => Ok(d.clone()),
            None => Ok(config_dir()?.join("outbox")),
        }
    }
}

/// Resolve the reportd config directory (~/.reportd/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".reportd"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.reportd/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<ReportdConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<ReportdConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(ReportdConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: ReportdConfig = json5::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Save configuration to the given path.
pub fn save_config_to(config: &ReportdConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
