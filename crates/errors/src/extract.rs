//! Archive extraction error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExtractError {
    #[error("archive not found: {path}")]
    ArchiveNotFound { path: String },

    #[error("corrupt archive {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("unsupported archive format: {path}")]
    UnsupportedFormat { path: String },

    #[error("unsafe entry {entry} in {path}: {reason}")]
    UnsafePath {
        path: String,
        entry: String,
        reason: String,
    },

    #[error("insufficient disk space extracting {path}")]
    InsufficientSpace { path: String },

    #[error("extraction of {path} was cancelled")]
    Cancelled { path: String },
}

impl UserFacingError for ExtractError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Corrupt { .. } => Some("The archive is damaged; download it again."),
            Self::UnsafePath { .. } => {
                Some("The archive tries to write outside its destination and was rejected.")
            }
            Self::InsufficientSpace { .. } => Some("Free up disk space and retry the extraction."),
            Self::UnsupportedFormat { .. } => Some("Supported formats are zip, tar and tar.gz."),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::InsufficientSpace { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::ArchiveNotFound { .. } => "extract.archive_not_found",
            Self::Corrupt { .. } => "extract.corrupt",
            Self::UnsupportedFormat { .. } => "extract.unsupported_format",
            Self::UnsafePath { .. } => "extract.unsafe_path",
            Self::InsufficientSpace { .. } => "extract.insufficient_space",
            Self::Cancelled { .. } => "extract.cancelled",
        };
        Some(code)
    }
}
