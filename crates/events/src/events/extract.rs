use fetchup_types::DownloadId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::FailureContext;

/// Archive extraction events
///
/// `id` is set when the extraction belongs to an auto-extracting download.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtractEvent {
    Started {
        id: Option<DownloadId>,
        archive: PathBuf,
        destination_path: PathBuf,
    },

    /// One archive entry written
    EntryExtracted {
        id: Option<DownloadId>,
        entry: String,
        index: usize,
        total: usize,
    },

    Completed {
        id: Option<DownloadId>,
        archive: PathBuf,
        destination_path: PathBuf,
        entries: usize,
    },

    Failed {
        id: Option<DownloadId>,
        archive: PathBuf,
        failure: FailureContext,
    },
}

impl ExtractEvent {
    #[must_use]
    pub fn id(&self) -> Option<&DownloadId> {
        match self {
            Self::Started { id, .. }
            | Self::EntryExtracted { id, .. }
            | Self::Completed { id, .. }
            | Self::Failed { id, .. } => id.as_ref(),
        }
    }
}
