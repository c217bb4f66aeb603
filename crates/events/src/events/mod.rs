use serde::{Deserialize, Serialize};

use crate::EventSource;
use fetchup_errors::{Error, ErrorKind, UserFacingError};

/// Structured failure information shared across domains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Stable, machine-checkable classification.
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
            hint: None,
            retryable: false,
        }
    }

    /// Build failure context from an error.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self {
            kind: error.kind(),
            code: error.user_code().map(Into::into),
            message: error.user_message().into_owned(),
            hint: error.user_hint().map(Into::into),
            retryable: error.is_retryable(),
        }
    }
}

pub mod download;
pub mod extract;
pub mod update;

pub use download::*;
pub use extract::*;
pub use update::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// Download task lifecycle and progress
    Download(DownloadEvent),

    /// Archive extraction
    Extract(ExtractEvent),

    /// Self-update workflow
    Update(UpdateEvent),
}

impl AppEvent {
    /// Identify the source domain for this event (used for metadata/logging).
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::Download(_) => EventSource::Download,
            Self::Extract(_) => EventSource::Extract,
            Self::Update(_) => EventSource::Update,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::Download(DownloadEvent::Failed { .. })
            | Self::Extract(ExtractEvent::Failed { .. })
            | Self::Update(UpdateEvent::Failed { .. } | UpdateEvent::RollbackFailed { .. }) => {
                Level::ERROR
            }

            Self::Download(DownloadEvent::Retrying { .. })
            | Self::Update(UpdateEvent::RollbackStarted { .. }) => Level::WARN,

            Self::Download(DownloadEvent::Progress { .. })
            | Self::Update(UpdateEvent::DownloadProgress { .. }) => Level::DEBUG,

            Self::Extract(ExtractEvent::EntryExtracted { .. }) => Level::TRACE,

            _ => Level::INFO,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::Download(_) => "fetchup::events::download",
            Self::Extract(_) => "fetchup::events::extract",
            Self::Update(_) => "fetchup::events::update",
        }
    }

    /// Name of the event on the boundary wire
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Download(event) => match event {
                DownloadEvent::Queued { .. } => "download-queued",
                DownloadEvent::Started { .. } => "download-started",
                DownloadEvent::Progress { .. } => "download-progress",
                DownloadEvent::Paused { .. } => "download-paused",
                DownloadEvent::Resumed { .. } => "download-resumed",
                DownloadEvent::Retrying { .. } => "download-retrying",
                DownloadEvent::Completed { .. } => "download-complete",
                DownloadEvent::Failed { .. } => "download-error",
                DownloadEvent::Cancelled { .. } => "download-cancelled",
            },
            Self::Extract(event) => match event {
                ExtractEvent::Started { .. } => "extraction-started",
                ExtractEvent::EntryExtracted { .. } => "extraction-progress",
                ExtractEvent::Completed { .. } => "extraction-complete",
                ExtractEvent::Failed { .. } => "extraction-error",
            },
            Self::Update(event) => match event {
                UpdateEvent::CheckStarted { .. } => "update-check-started",
                UpdateEvent::UpToDate { .. } => "update-not-available",
                UpdateEvent::Available { .. } => "update-available",
                UpdateEvent::DownloadStarted { .. } => "update-download-started",
                UpdateEvent::DownloadProgress { .. } => "update-download-progress",
                UpdateEvent::Verified { .. } => "update-verified",
                UpdateEvent::BackupCreated { .. } => "update-backup-created",
                UpdateEvent::Installing { .. } => "update-installing",
                UpdateEvent::Installed { .. } => "update-installed",
                UpdateEvent::Confirmed { .. } => "update-confirmed",
                UpdateEvent::RollbackStarted { .. } => "update-rollback-started",
                UpdateEvent::RolledBack { .. } => "update-rolled-back",
                UpdateEvent::Failed { .. } => "update-error",
                UpdateEvent::RollbackFailed { .. } => "update-rollback-failed",
            },
        }
    }

    /// Identifier used to correlate events of one task or release
    #[must_use]
    pub fn correlation_id(&self) -> Option<String> {
        match self {
            Self::Download(event) => Some(event.id().to_string()),
            Self::Extract(event) => event.id().map(ToString::to_string),
            Self::Update(
                UpdateEvent::DownloadStarted { version, .. }
                | UpdateEvent::DownloadProgress { version, .. }
                | UpdateEvent::Verified { version, .. },
            ) => Some(version.to_string()),
            _ => None,
        }
    }
}
