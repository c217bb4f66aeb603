//! Download task model and state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::archive::ArchiveFormat;

/// Caller-supplied unique token identifying a download task
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(String);

impl DownloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random id for callers that did not supply one
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DownloadId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DownloadId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Pending,
    Downloading,
    Paused,
    Cancelled,
    Completed,
    Extracting,
    Extracted,
    Failed,
    ExtractionFailed,
}

impl DownloadState {
    /// Terminal states never transition again
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled
                | Self::Completed
                | Self::Extracted
                | Self::Failed
                | Self::ExtractionFailed
        )
    }

    /// Whether a unit of work is currently running for the task
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Downloading | Self::Extracting)
    }

    /// Check whether `next` is a legal successor of this state.
    ///
    /// `Downloading -> Downloading` is the retry edge. `Paused -> Pending`
    /// covers a resume that has to wait for a free transfer slot.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use DownloadState::{
            Cancelled, Completed, Downloading, Extracted, Extracting, ExtractionFailed, Failed,
            Paused, Pending,
        };
        match self {
            Pending => matches!(next, Downloading | Paused | Cancelled),
            Downloading => matches!(
                next,
                Downloading | Paused | Cancelled | Completed | Extracting | Failed
            ),
            Paused => matches!(next, Downloading | Pending | Cancelled),
            Extracting => matches!(next, Extracted | ExtractionFailed | Cancelled),
            Cancelled | Completed | Extracted | Failed | ExtractionFailed => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Extracting => "extracting",
            Self::Extracted => "extracted",
            Self::Failed => "failed",
            Self::ExtractionFailed => "extraction_failed",
        }
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a start-download command
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Caller-supplied id; generated when absent
    #[serde(default)]
    pub id: Option<DownloadId>,
    pub url: String,
    /// Destination directory; the configured default applies when absent
    #[serde(default)]
    pub destination: Option<PathBuf>,
    /// File name inside the destination; derived from the URL when absent
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub auto_extract: bool,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<DownloadId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn auto_extract(mut self, enabled: bool) -> Self {
        self.auto_extract = enabled;
        self
    }
}

/// One tracked download
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadTask {
    pub id: DownloadId,
    pub url: String,
    /// Directory the file is written into
    pub destination: PathBuf,
    pub file_name: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub state: DownloadState,
    pub bytes_received: u64,
    /// Unknown until the server responds, or when it omits a length
    pub total_bytes: Option<u64>,
    /// Fixed at creation
    pub auto_extract: bool,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadTask {
    /// Create a pending task
    pub fn new(
        id: DownloadId,
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        file_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            url: url.into(),
            destination: destination.into(),
            file_name: file_name.into(),
            headers: BTreeMap::new(),
            state: DownloadState::Pending,
            bytes_received: 0,
            total_bytes: None,
            auto_extract: false,
            retry_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full path of the downloaded file
    #[must_use]
    pub fn file_path(&self) -> PathBuf {
        self.destination.join(&self.file_name)
    }

    /// Directory an auto-extracted archive is unpacked into
    #[must_use]
    pub fn extract_dir(&self) -> PathBuf {
        self.destination
            .join(ArchiveFormat::strip_extension(Path::new(&self.file_name)))
    }

    /// Total size using the `-1` sentinel for unknown lengths
    #[must_use]
    pub fn total_bytes_or_sentinel(&self) -> i64 {
        self.total_bytes
            .and_then(|total| i64::try_from(total).ok())
            .unwrap_or(-1)
    }

    /// Record a state change, refusing edges the state machine does not allow
    pub fn transition(&mut self, next: DownloadState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }

    /// Record progress; never lets the counter exceed a known total
    pub fn record_progress(&mut self, bytes_received: u64, total_bytes: Option<u64>) {
        if total_bytes.is_some() {
            self.total_bytes = total_bytes;
        }
        self.bytes_received = match self.total_bytes {
            Some(total) => bytes_received.min(total),
            None => bytes_received,
        };
        self.updated_at = Utc::now();
    }
}

/// Result of a pause, resume, cancel or remove command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The command changed the task
    Applied,
    /// The task exists but the command had nothing to do
    NoOp { state: DownloadState },
    NotFound,
}

impl CommandOutcome {
    #[must_use]
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}
