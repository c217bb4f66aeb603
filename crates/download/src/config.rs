//! Download manager settings

use fetchup_config::constants::DOWNLOADS_CHECKPOINT;
use fetchup_config::{Config, RetryConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Settings for a [`crate::DownloadManager`]
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Upper bound on live transfers
    pub max_concurrent: usize,
    /// Terminal tasks kept for queries
    pub retain_finished: usize,
    pub checkpoint_interval: Duration,
    pub retry: RetryConfig,
    /// Used when a request names no destination
    pub default_directory: PathBuf,
    /// `None` disables persistence
    pub checkpoint_path: Option<PathBuf>,
}

impl ManagerConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent: config.download.max_concurrent,
            retain_finished: config.download.retain_finished,
            checkpoint_interval: Duration::from_millis(config.download.checkpoint_interval_ms),
            retry: config.retry.clone(),
            default_directory: config.download_dir(),
            checkpoint_path: Some(config.state_dir().join(DOWNLOADS_CHECKPOINT)),
        }
    }

    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    #[must_use]
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        let config = Config::default();
        Self {
            checkpoint_path: None,
            ..Self::from_config(&config)
        }
    }
}
