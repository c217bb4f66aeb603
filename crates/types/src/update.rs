//! Update and backup type definitions

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// A release the installer can download and apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePackage {
    pub version: Version,
    pub download_url: String,
    /// Expected digest, `algorithm:hex` or bare SHA-256 hex
    pub checksum: String,
    /// Set once the package has been downloaded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

/// Result of asking the version source for a newer release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum UpdateCheck {
    UpToDate { current: Version },
    Available { package: UpdatePackage },
}

/// Lifecycle of a backup record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// Restorable copy of the installation preceding the latest install
    RollbackTarget,
    /// The new version was confirmed running; eligible for pruning
    Obsolete,
    /// The installation was restored from this backup
    Restored,
}

/// Preserved copy of a pre-update installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backup {
    pub id: Uuid,
    pub source_version: Version,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub status: BackupStatus,
}

/// Summary of a completed install
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReport {
    pub install_dir: PathBuf,
    pub backup: Backup,
    /// Number of files in the new installation
    pub files: usize,
    pub duration_ms: u64,
}

/// Summary of a completed rollback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackReport {
    pub install_dir: PathBuf,
    pub backup_path: PathBuf,
    pub files: usize,
}
