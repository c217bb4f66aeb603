#![warn(mismatched_lifetime_syntaxes)]
#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Error types for fetchup
//!
//! This crate provides fine-grained error types organized by domain.
//! Every error maps onto a stable [`ErrorKind`] so the boundary layer can
//! branch on failures without parsing messages.

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

pub mod config;
pub mod download;
pub mod extract;
pub mod install;
pub mod network;
pub mod storage;

// Re-export all error types at the root
pub use config::ConfigError;
pub use download::DownloadError;
pub use extract::ExtractError;
pub use install::InstallError;
pub use network::NetworkError;
pub use storage::StorageError;

/// Generic error type for cross-crate boundaries
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    #[error("extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("install error: {0}")]
    Install(#[from] InstallError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {message}")]
    Io {
        #[cfg_attr(feature = "serde", serde(with = "io_kind_as_str"))]
        kind: std::io::ErrorKind,
        message: String,
        #[cfg_attr(feature = "serde", serde(with = "opt_path_buf"))]
        path: Option<std::path::PathBuf>,
    },
}

/// Stable, machine-checkable classification of every failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ErrorKind {
    /// Unknown task, backup or file
    NotFound,
    /// Network failure, timeout or 5xx; retried before surfacing
    TransientTransfer,
    /// 4xx, malformed URL or unsupported protocol
    PermanentTransfer,
    ChecksumMismatch,
    ExtractionCorrupt,
    ExtractionUnsafePath,
    DiskSpace,
    PermissionDenied,
    /// Automated recovery is exhausted; the backup path must be reported
    RollbackFailed,
    InstallFailed,
    InvalidRequest,
    Cancelled,
    Config,
    Internal,
}

impl ErrorKind {
    /// Wire name of the kind
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::TransientTransfer => "transient_transfer",
            Self::PermanentTransfer => "permanent_transfer",
            Self::ChecksumMismatch => "checksum_mismatch",
            Self::ExtractionCorrupt => "extraction_corrupt",
            Self::ExtractionUnsafePath => "extraction_unsafe_path",
            Self::DiskSpace => "disk_space",
            Self::PermissionDenied => "permission_denied",
            Self::RollbackFailed => "rollback_failed",
            Self::InstallFailed => "install_failed",
            Self::InvalidRequest => "invalid_request",
            Self::Cancelled => "cancelled",
            Self::Config => "config",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an Io error with an associated path
    pub fn io_with_path(err: &std::io::Error, path: impl Into<std::path::PathBuf>) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: Some(path.into()),
        }
    }

    /// Classify this error into the stable taxonomy
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network(NetworkError::ChecksumMismatch { .. }) => ErrorKind::ChecksumMismatch,
            Error::Network(err) if err.is_retryable() => ErrorKind::TransientTransfer,
            Error::Network(_) => ErrorKind::PermanentTransfer,
            Error::Download(DownloadError::TaskNotFound { .. }) => ErrorKind::NotFound,
            Error::Download(DownloadError::ManagerStopped) => ErrorKind::Internal,
            Error::Download(_) => ErrorKind::InvalidRequest,
            Error::Extract(err) => match err {
                ExtractError::ArchiveNotFound { .. } => ErrorKind::NotFound,
                ExtractError::Corrupt { .. } | ExtractError::UnsupportedFormat { .. } => {
                    ErrorKind::ExtractionCorrupt
                }
                ExtractError::UnsafePath { .. } => ErrorKind::ExtractionUnsafePath,
                ExtractError::InsufficientSpace { .. } => ErrorKind::DiskSpace,
                ExtractError::Cancelled { .. } => ErrorKind::Cancelled,
            },
            Error::Install(err) => match err {
                InstallError::ArtifactNotFound { .. } | InstallError::BackupNotFound { .. } => {
                    ErrorKind::NotFound
                }
                InstallError::RollbackFailed { .. } => ErrorKind::RollbackFailed,
                InstallError::Unverified { .. } => ErrorKind::ChecksumMismatch,
                InstallError::NoVersionSource => ErrorKind::Config,
                _ => ErrorKind::InstallFailed,
            },
            Error::Storage(err) => match err {
                StorageError::DiskFull { .. } => ErrorKind::DiskSpace,
                StorageError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
                StorageError::PathNotFound { .. } => ErrorKind::NotFound,
                _ => ErrorKind::Internal,
            },
            Error::Config(_) => ErrorKind::Config,
            Error::Internal(_) => ErrorKind::Internal,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Io { kind, .. } => match kind {
                std::io::ErrorKind::StorageFull => ErrorKind::DiskSpace,
                std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                _ => ErrorKind::Internal,
            },
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
            path: None,
        }
    }
}

impl From<semver::Error> for Error {
    fn from(err: semver::Error) -> Self {
        Self::Install(InstallError::InvalidRelease {
            message: err.to_string(),
        })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(StorageError::CorruptedData {
            message: format!("JSON error: {err}"),
        })
    }
}

/// Result type alias for fetchup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Minimal interface for rendering user-facing error information without
/// requiring heavyweight envelopes.
pub trait UserFacingError {
    /// Short message suitable for display.
    fn user_message(&self) -> Cow<'_, str>;

    /// Optional remediation hint.
    fn user_hint(&self) -> Option<&'static str> {
        None
    }

    /// Whether retrying the same operation is likely to succeed.
    fn is_retryable(&self) -> bool {
        false
    }

    /// Stable error code for analytics / structured reporting.
    fn user_code(&self) -> Option<&'static str> {
        None
    }
}

impl UserFacingError for Error {
    fn user_message(&self) -> Cow<'_, str> {
        match self {
            Error::Network(err) => err.user_message(),
            Error::Download(err) => err.user_message(),
            Error::Extract(err) => err.user_message(),
            Error::Install(err) => err.user_message(),
            Error::Storage(err) => err.user_message(),
            Error::Io {
                message,
                path: Some(path),
                ..
            } => Cow::Owned(format!("{}: {message}", path.display())),
            Error::Io { message, .. } => Cow::Owned(message.clone()),
            _ => Cow::Owned(self.to_string()),
        }
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Error::Network(err) => err.user_hint(),
            Error::Download(err) => err.user_hint(),
            Error::Extract(err) => err.user_hint(),
            Error::Install(err) => err.user_hint(),
            Error::Storage(err) => err.user_hint(),
            Error::Config(err) => err.user_hint(),
            Error::Io { kind, .. } => match kind {
                std::io::ErrorKind::StorageFull => Some("Free up disk space and retry."),
                std::io::ErrorKind::PermissionDenied => {
                    Some("Choose a writable location or adjust filesystem permissions.")
                }
                _ => None,
            },
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(err) => err.is_retryable(),
            Error::Download(err) => err.is_retryable(),
            Error::Extract(err) => err.is_retryable(),
            Error::Install(err) => err.is_retryable(),
            Error::Storage(err) => err.is_retryable(),
            _ => false,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        match self {
            Error::Network(err) => err.user_code(),
            Error::Download(err) => err.user_code(),
            Error::Extract(err) => err.user_code(),
            Error::Install(err) => err.user_code(),
            Error::Storage(err) => err.user_code(),
            Error::Config(err) => err.user_code(),
            Error::Internal(_) => Some("error.internal"),
            Error::Cancelled => Some("error.cancelled"),
            Error::Io { .. } => Some("error.io"),
        }
    }
}

// Serde helper modules for optional path and io::ErrorKind as string
#[cfg(feature = "serde")]
mod io_kind_as_str {
    use serde::{Deserialize, Deserializer, Serializer};
    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S>(kind: &std::io::ErrorKind, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        s.serialize_str(&format!("{kind:?}"))
    }
    pub fn deserialize<'de, D>(deserializer: D) -> Result<std::io::ErrorKind, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        // Best effort mapping; default to Other
        Ok(match s.as_str() {
            "NotFound" => std::io::ErrorKind::NotFound,
            "PermissionDenied" => std::io::ErrorKind::PermissionDenied,
            "AlreadyExists" => std::io::ErrorKind::AlreadyExists,
            "StorageFull" => std::io::ErrorKind::StorageFull,
            "InvalidInput" => std::io::ErrorKind::InvalidInput,
            "InvalidData" => std::io::ErrorKind::InvalidData,
            "TimedOut" => std::io::ErrorKind::TimedOut,
            "Interrupted" => std::io::ErrorKind::Interrupted,
            "UnexpectedEof" => std::io::ErrorKind::UnexpectedEof,
            _ => std::io::ErrorKind::Other,
        })
    }
}

#[cfg(feature = "serde")]
mod opt_path_buf {
    use serde::{Deserialize, Deserializer, Serializer};
    #[allow(clippy::ref_option)]
    pub fn serialize<S>(path: &Option<std::path::PathBuf>, s: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match path {
            Some(pb) => s.serialize_some(&pb.display().to_string()),
            None => s.serialize_none(),
        }
    }
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<std::path::PathBuf>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt = Option::<String>::deserialize(deserializer)?;
        Ok(opt.map(std::path::PathBuf::from))
    }
}
