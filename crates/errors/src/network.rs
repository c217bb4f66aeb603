//! Network-related error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NetworkError {
    #[error("no data received from {url} for {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("transfer interrupted: {0}")]
    DownloadFailed(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported protocol: {protocol}")]
    UnsupportedProtocol { protocol: String },

    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("SSL/TLS error: {0}")]
    TlsError(String),

    #[error("rate limited: retry after {seconds} seconds")]
    RateLimited { seconds: u64 },
}

impl NetworkError {
    /// HTTP status of the failure, if the server answered at all
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpError { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

impl UserFacingError for NetworkError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Timeout { .. } | Self::ConnectionRefused(_) | Self::DownloadFailed(_) => {
                Some("Check your network connection and resume the download.")
            }
            Self::InvalidUrl(_) | Self::UnsupportedProtocol { .. } => {
                Some("Use an http:// or https:// download link.")
            }
            Self::HttpError { status, .. } if *status >= 500 => {
                Some("The server is having trouble; try again later.")
            }
            Self::HttpError { .. } => Some("Verify the download link is still valid."),
            Self::ChecksumMismatch { .. } => {
                Some("The downloaded file is corrupt or was tampered with; download it again.")
            }
            Self::TlsError(_) => Some("Check the system clock and certificate store."),
            Self::RateLimited { .. } => Some("Wait for the indicated time before retrying."),
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::DownloadFailed(_)
            | Self::ConnectionRefused(_)
            | Self::RateLimited { .. } => true,
            Self::HttpError { status, .. } => *status >= 500,
            Self::InvalidUrl(_)
            | Self::UnsupportedProtocol { .. }
            | Self::ChecksumMismatch { .. }
            | Self::TlsError(_) => false,
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::Timeout { .. } => "network.timeout",
            Self::DownloadFailed(_) => "network.download_failed",
            Self::ConnectionRefused(_) => "network.connection_refused",
            Self::InvalidUrl(_) => "network.invalid_url",
            Self::UnsupportedProtocol { .. } => "network.unsupported_protocol",
            Self::HttpError { .. } => "network.http_error",
            Self::ChecksumMismatch { .. } => "network.checksum_mismatch",
            Self::TlsError(_) => "network.tls_error",
            Self::RateLimited { .. } => "network.rate_limited",
        };
        Some(code)
    }
}
