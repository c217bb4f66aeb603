//! Fixed file names and environment variable names

/// Directory name under the platform data and config directories
pub const APP_DIR: &str = "fetchup";

/// Download checkpoint file inside the state directory
pub const DOWNLOADS_CHECKPOINT: &str = "downloads.json";
/// Backup registry manifest inside the backup directory
pub const BACKUPS_MANIFEST: &str = "backups.json";

pub const ENV_MAX_CONCURRENT: &str = "FETCHUP_MAX_CONCURRENT";
pub const ENV_IDLE_TIMEOUT: &str = "FETCHUP_IDLE_TIMEOUT";
pub const ENV_RETRY_ATTEMPTS: &str = "FETCHUP_RETRY_ATTEMPTS";
pub const ENV_INSTALL_DIR: &str = "FETCHUP_INSTALL_DIR";
pub const ENV_MANIFEST_URL: &str = "FETCHUP_MANIFEST_URL";
