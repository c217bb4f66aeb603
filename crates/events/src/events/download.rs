use fetchup_types::DownloadId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::FailureContext;

/// Download task lifecycle events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadEvent {
    /// Task registered and waiting for a transfer slot
    Queued {
        id: DownloadId,
        url: String,
        destination_path: PathBuf,
        position: usize,
    },

    /// Transfer attempt started
    Started {
        id: DownloadId,
        url: String,
        resume_offset: u64,
    },

    /// Coalesced progress; `bytes_received` never decreases for a task
    Progress {
        id: DownloadId,
        bytes_received: u64,
        total_bytes: Option<u64>,
    },

    Paused {
        id: DownloadId,
        bytes_received: u64,
    },

    Resumed {
        id: DownloadId,
        bytes_received: u64,
    },

    /// Transient failure; another attempt follows after `delay_ms`
    Retrying {
        id: DownloadId,
        attempt: u32,
        max_attempts: u32,
        delay_ms: u64,
        failure: FailureContext,
    },

    Completed {
        id: DownloadId,
        destination_path: PathBuf,
        bytes_received: u64,
    },

    Failed {
        id: DownloadId,
        failure: FailureContext,
    },

    Cancelled {
        id: DownloadId,
    },
}

impl DownloadEvent {
    /// Task the event belongs to
    #[must_use]
    pub fn id(&self) -> &DownloadId {
        match self {
            Self::Queued { id, .. }
            | Self::Started { id, .. }
            | Self::Progress { id, .. }
            | Self::Paused { id, .. }
            | Self::Resumed { id, .. }
            | Self::Retrying { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. }
            | Self::Cancelled { id } => id,
        }
    }

    /// Whether no further download events follow for this task
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}
