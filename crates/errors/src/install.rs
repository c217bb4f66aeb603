//! Update installation error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InstallError {
    #[error("no release source configured")]
    NoVersionSource,

    #[error("invalid release metadata: {message}")]
    InvalidRelease { message: String },

    #[error("update artifact not found: {path}")]
    ArtifactNotFound { path: String },

    #[error("update artifact {path} has no known checksum")]
    Unverified { path: String },

    #[error("backup creation failed: {message}")]
    BackupFailed { message: String },

    #[error("backup not found: {path}")]
    BackupNotFound { path: String },

    #[error("installation failed: {message}")]
    Failed { message: String },

    #[error("installation verification failed: {message}")]
    VerificationFailed { message: String },

    #[error("installation failed ({cause}) and was rolled back from {backup_path}")]
    RolledBack { cause: String, backup_path: String },

    #[error("rollback from {backup_path} failed: {message}")]
    RollbackFailed {
        backup_path: String,
        message: String,
    },

    #[error("another installation is already in progress")]
    InProgress,

    #[error("update download {id} ended in state {state}")]
    DownloadIncomplete { id: String, state: String },
}

impl UserFacingError for InstallError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::NoVersionSource => Some("Set update.manifest_url in the configuration file."),
            Self::BackupFailed { .. } => {
                Some("Nothing was changed. Free disk space in the backup directory and retry.")
            }
            Self::RolledBack { .. } => Some("The previous version was restored; retry the update."),
            Self::RollbackFailed { .. } => Some(
                "Automatic recovery failed. Restore the installation manually from the backup path.",
            ),
            Self::InProgress => Some("Wait for the running installation to finish."),
            Self::Unverified { .. } => {
                Some("Fetch the package with download-update or pass its checksum.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::InProgress | Self::RolledBack { .. } | Self::DownloadIncomplete { .. }
        )
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::NoVersionSource => "install.no_version_source",
            Self::InvalidRelease { .. } => "install.invalid_release",
            Self::ArtifactNotFound { .. } => "install.artifact_not_found",
            Self::Unverified { .. } => "install.unverified",
            Self::BackupFailed { .. } => "install.backup_failed",
            Self::BackupNotFound { .. } => "install.backup_not_found",
            Self::Failed { .. } => "install.failed",
            Self::VerificationFailed { .. } => "install.verification_failed",
            Self::RolledBack { .. } => "install.rolled_back",
            Self::RollbackFailed { .. } => "install.rollback_failed",
            Self::InProgress => "install.in_progress",
            Self::DownloadIncomplete { .. } => "install.download_incomplete",
        };
        Some(code)
    }
}
