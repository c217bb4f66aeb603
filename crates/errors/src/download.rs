//! Download manager error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DownloadError {
    #[error("download not found: {id}")]
    TaskNotFound { id: String },

    #[error("download {id} is already active")]
    AlreadyActive { id: String },

    #[error("invalid download request: {message}")]
    InvalidRequest { message: String },

    #[error("download manager is not running")]
    ManagerStopped,
}

impl UserFacingError for DownloadError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::AlreadyActive { .. } => {
                Some("Pause or cancel the existing download, or pick a new download id.")
            }
            Self::ManagerStopped => Some("Restart the application to resume downloads."),
            _ => None,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::TaskNotFound { .. } => "download.not_found",
            Self::AlreadyActive { .. } => "download.already_active",
            Self::InvalidRequest { .. } => "download.invalid_request",
            Self::ManagerStopped => "download.manager_stopped",
        };
        Some(code)
    }
}
