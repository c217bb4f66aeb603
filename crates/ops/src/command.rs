//! Boundary commands and their payloads

use fetchup_errors::{DownloadError, Error};
use fetchup_types::{DownloadId, DownloadRequest};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A command as named on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload", rename_all = "kebab-case")]
pub enum Command {
    DownloadFile(DownloadFileArgs),
    PauseDownload(DownloadIdArgs),
    ResumeDownload(DownloadIdArgs),
    CancelDownload(DownloadIdArgs),
    /// Forget a finished download
    RemoveDownload(DownloadIdArgs),
    GetDownload(DownloadIdArgs),
    ListDownloads,
    CheckForUpdates,
    DownloadUpdate(DownloadUpdateArgs),
    InstallUpdate(InstallUpdateArgs),
    RollbackUpdate(RollbackUpdateArgs),
    ConfirmInstall,
    GetBackups,
    ExtractArchiveAndDelete(ExtractArgs),
}

impl Command {
    /// Build a command from its wire name and payload
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidRequest` for unknown names or payloads
    /// that do not fit the command.
    pub fn from_parts(name: &str, payload: serde_json::Value) -> Result<Self, Error> {
        let mut envelope = serde_json::Map::new();
        envelope.insert("command".to_string(), serde_json::Value::String(name.to_string()));
        if !payload.is_null() {
            envelope.insert("payload".to_string(), payload);
        }
        serde_json::from_value(serde_json::Value::Object(envelope)).map_err(|e| {
            DownloadError::InvalidRequest {
                message: format!("{name}: {e}"),
            }
            .into()
        })
    }

    /// Wire name of the command
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DownloadFile(_) => "download-file",
            Self::PauseDownload(_) => "pause-download",
            Self::ResumeDownload(_) => "resume-download",
            Self::CancelDownload(_) => "cancel-download",
            Self::RemoveDownload(_) => "remove-download",
            Self::GetDownload(_) => "get-download",
            Self::ListDownloads => "list-downloads",
            Self::CheckForUpdates => "check-for-updates",
            Self::DownloadUpdate(_) => "download-update",
            Self::InstallUpdate(_) => "install-update",
            Self::RollbackUpdate(_) => "rollback-update",
            Self::ConfirmInstall => "confirm-install",
            Self::GetBackups => "get-backups",
            Self::ExtractArchiveAndDelete(_) => "extract-archive-and-delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadFileArgs {
    pub url: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub destination: Option<PathBuf>,
    #[serde(default)]
    pub download_id: Option<DownloadId>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Accepted for compatibility; directory pickers belong to the UI
    #[serde(default)]
    pub show_directory_selector: bool,
    #[serde(default)]
    pub auto_extract: bool,
}

impl From<DownloadFileArgs> for DownloadRequest {
    fn from(args: DownloadFileArgs) -> Self {
        Self {
            id: args.download_id,
            url: args.url,
            destination: args.destination,
            file_name: args.file_name.filter(|name| !name.is_empty()),
            headers: args.headers,
            auto_extract: args.auto_extract,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadIdArgs {
    pub download_id: DownloadId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUpdateArgs {
    pub download_url: String,
    pub version: String,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallUpdateArgs {
    pub file_path: PathBuf,
    #[serde(default)]
    pub backup_path: Option<PathBuf>,
    /// Required unless the file came from `download-update`
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackUpdateArgs {
    pub backup_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractArgs {
    pub archive_path: PathBuf,
    pub destination_path: PathBuf,
}
