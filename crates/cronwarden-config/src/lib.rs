use std::path::{Path, PathBuf};

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
}

/// Default cap for the execution log and the login log.
pub const DEFAULT_LOG_RETENTION: usize = 1000;

/// Database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path. Defaults to `~/.cronwarden/cronwarden.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Scheduler and executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Shell used to run job commands. Platform default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    /// Maximum number of rows kept in each log table.
    #[serde(default = "default_log_retention")]
    pub log_retention: usize,
    /// How often `serve` re-reads the job table. 0 disables it.
    #[serde(default = "default_resync_interval")]
    pub resync_interval_secs: u64,
}

fn default_log_retention() -> usize {
    DEFAULT_LOG_RETENTION
}

fn default_resync_interval() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shell: None,
            log_retention: default_log_retention(),
            resync_interval_secs: default_resync_interval(),
        }
    }
}

/// Login throttle thresholds. Either field may be left out.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AntiBruteForceConfig {
    #[serde(
        rename = "MaxUsernameFailedAttempts",
        alias = "max_username_failed_attempts",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_username_failed_attempts: Option<u32>,
    #[serde(
        rename = "MaxIpFailedAttempts",
        alias = "max_ip_failed_attempts",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_ip_failed_attempts: Option<u32>,
}

/// Top-level cronwarden configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronwardenConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Absent section means "use defaults, but say so".
    #[serde(
        rename = "AntiBruteForce",
        alias = "anti_brute_force",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub anti_brute_force: Option<AntiBruteForceConfig>,
}

impl CronwardenConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("cronwarden.db")),
        }
    }
}

/// Resolve the cronwarden config directory (~/.cronwarden/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".cronwarden"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.cronwarden/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<CronwardenConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = match std::env::var_os("CRONWARDEN_CONFIG") {
        Some(p) => PathBuf::from(p),
        None => config_file_path()?,
    };
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<CronwardenConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(CronwardenConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: CronwardenConfig = json5::from_str(&content)?;
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

/// Save configuration to the default path.
pub fn save_config(config: &CronwardenConfig) -> Result<(), ConfigError> {
    let dir = ensure_config_dir()?;
    save_config_to(config, &dir.join("config.json5"))
}

/// Save configuration to a specific path.
pub fn save_config_to(config: &CronwardenConfig, path: &Path) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
