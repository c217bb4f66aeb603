use fetchup_types::{Backup, DownloadId, Version};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::FailureContext;

/// Update workflow stage, used to locate failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStage {
    Check,
    Download,
    Verify,
    Backup,
    Install,
    Rollback,
}

/// Self-update workflow events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    CheckStarted {
        current: Version,
    },

    UpToDate {
        current: Version,
    },

    Available {
        current: Version,
        available: Version,
    },

    DownloadStarted {
        version: Version,
        id: DownloadId,
    },

    /// Mirrors the package's download progress under its own name
    DownloadProgress {
        version: Version,
        id: DownloadId,
        bytes_received: u64,
        total_bytes: Option<u64>,
    },

    /// Package digest matched the advertised checksum
    Verified {
        version: Version,
        path: PathBuf,
    },

    BackupCreated {
        backup: Backup,
    },

    Installing {
        artifact: PathBuf,
        install_dir: PathBuf,
    },

    Installed {
        install_dir: PathBuf,
        backup_path: PathBuf,
    },

    /// The new version was confirmed running
    Confirmed {
        backup_path: PathBuf,
    },

    RollbackStarted {
        backup_path: PathBuf,
    },

    RolledBack {
        backup_path: PathBuf,
    },

    Failed {
        stage: UpdateStage,
        failure: FailureContext,
    },

    /// Automated recovery is exhausted; the installation must be restored
    /// manually from `backup_path`
    RollbackFailed {
        backup_path: PathBuf,
        failure: FailureContext,
    },
}
