#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for fetchup
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/fetchup/config.toml)
//! - Environment variables
//! - CLI flags (applied by the binary)

pub mod constants;

use fetchup_errors::{ConfigError, Error};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use constants::{
    APP_DIR, ENV_IDLE_TIMEOUT, ENV_INSTALL_DIR, ENV_MANIFEST_URL, ENV_MAX_CONCURRENT,
    ENV_RETRY_ATTEMPTS,
};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub update: UpdateConfig,

    #[serde(default)]
    pub paths: PathConfig,
}

/// Download manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Upper bound on simultaneously transferring tasks
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Terminal tasks kept for queries before eviction
    #[serde(default = "default_retain_finished")]
    pub retain_finished: usize,
    #[serde(default = "default_checkpoint_interval_ms")]
    pub checkpoint_interval_ms: u64,
    /// Used when a request names no destination
    #[serde(default)]
    pub default_directory: Option<PathBuf>,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Window without received bytes after which an attempt fails
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Minimum spacing of progress notifications
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Retry policy for transient transfer failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Fraction of the delay added as random jitter (0.0 to 1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

/// Self-update configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// Release manifest endpoint; update checks are disabled without it
    #[serde(default)]
    pub manifest_url: Option<String>,
    #[serde(default = "default_current_version")]
    pub current_version: Version,
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    pub state_dir: Option<PathBuf>,
    pub install_dir: Option<PathBuf>,
    pub backup_dir: Option<PathBuf>,
    pub update_dir: Option<PathBuf>,
}

impl PathConfig {
    /// Place every directory under one root
    #[must_use]
    pub fn rooted(root: &Path) -> Self {
        Self {
            state_dir: Some(root.join("state")),
            install_dir: Some(root.join("app")),
            backup_dir: Some(root.join("backups")),
            update_dir: Some(root.join("updates")),
        }
    }
}

// Default implementations

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            retain_finished: default_retain_finished(),
            checkpoint_interval_ms: default_checkpoint_interval_ms(),
            default_directory: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            progress_interval_ms: default_progress_interval_ms(),
            buffer_size: default_buffer_size(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            manifest_url: None,
            current_version: default_current_version(),
            max_backups: default_max_backups(),
        }
    }
}

// Default value functions for serde
fn default_max_concurrent() -> usize {
    3
}

fn default_retain_finished() -> usize {
    100
}

fn default_checkpoint_interval_ms() -> u64 {
    2000
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_progress_interval_ms() -> u64 {
    100
}

fn default_buffer_size() -> usize {
    64 * 1024
}

fn default_user_agent() -> String {
    format!("fetchup/{}", env!("CARGO_PKG_VERSION"))
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.1
}

fn default_current_version() -> Version {
    Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or_else(|_| Version::new(0, 0, 0))
}

fn default_max_backups() -> usize {
    3
}

impl RetryConfig {
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl NetworkConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join(APP_DIR).join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    /// Merge overrides from any variable lookup
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds a value that does not parse.
    pub fn merge_vars<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_MAX_CONCURRENT) {
            self.download.max_concurrent = parse_var(ENV_MAX_CONCURRENT, value)?;
        }

        if let Some(value) = lookup(ENV_IDLE_TIMEOUT) {
            self.network.idle_timeout_secs = parse_var(ENV_IDLE_TIMEOUT, value)?;
        }

        if let Some(value) = lookup(ENV_RETRY_ATTEMPTS) {
            self.retry.max_attempts = parse_var(ENV_RETRY_ATTEMPTS, value)?;
        }

        if let Some(value) = lookup(ENV_INSTALL_DIR) {
            if value.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: ENV_INSTALL_DIR.to_string(),
                    value,
                }
                .into());
            }
            self.paths.install_dir = Some(PathBuf::from(value));
        }

        if let Some(value) = lookup(ENV_MANIFEST_URL) {
            self.update.manifest_url = Some(value);
        }

        Ok(())
    }

    /// Reject settings the core cannot run with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` naming the first offending field.
    pub fn validate(&self) -> Result<(), Error> {
        if self.download.max_concurrent == 0 {
            return Err(invalid_value("download.max_concurrent", 0));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid_value("retry.max_attempts", 0));
        }
        if self.network.idle_timeout_secs == 0 {
            return Err(invalid_value("network.idle_timeout_secs", 0));
        }
        if self.network.buffer_size == 0 {
            return Err(invalid_value("network.buffer_size", 0));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid_value(
                "retry.backoff_multiplier",
                self.retry.backoff_multiplier,
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(invalid_value("retry.jitter_factor", self.retry.jitter_factor));
        }
        Ok(())
    }

    /// Get the state directory (checkpoints)
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.paths
            .state_dir
            .clone()
            .unwrap_or_else(|| data_root().join("state"))
    }

    /// Get the installation directory the updater manages
    #[must_use]
    pub fn install_dir(&self) -> PathBuf {
        self.paths
            .install_dir
            .clone()
            .unwrap_or_else(|| data_root().join("app"))
    }

    /// Get the backup directory
    #[must_use]
    pub fn backup_dir(&self) -> PathBuf {
        self.paths
            .backup_dir
            .clone()
            .unwrap_or_else(|| data_root().join("backups"))
    }

    /// Get the directory update packages are downloaded into
    #[must_use]
    pub fn update_dir(&self) -> PathBuf {
        self.paths
            .update_dir
            .clone()
            .unwrap_or_else(|| data_root().join("updates"))
    }

    /// Get the directory used when a download names no destination
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.download
            .default_directory
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| data_root().join("downloads"))
    }
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn invalid_value(field: &str, value: impl ToString) -> Error {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}

fn parse_var<T: std::str::FromStr>(field: &str, value: String) -> Result<T, Error> {
    value.trim().parse().map_err(|_| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value,
        }
        .into()
    })
}
