//! Messages into the manager actor

use fetchup_errors::Error;
use fetchup_net::TransferProgress;
use fetchup_types::{CommandOutcome, DownloadId, DownloadRequest, DownloadTask, ExtractionReport};
use std::time::Duration;
use tokio::sync::oneshot;

/// Commands from [`crate::DownloadManager`] handles
#[derive(Debug)]
pub(crate) enum Command {
    Start {
        request: DownloadRequest,
        reply: oneshot::Sender<Result<DownloadTask, Error>>,
    },
    Pause {
        id: DownloadId,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Resume {
        id: DownloadId,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Cancel {
        id: DownloadId,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Remove {
        id: DownloadId,
        reply: oneshot::Sender<CommandOutcome>,
    },
    Get {
        id: DownloadId,
        reply: oneshot::Sender<Option<DownloadTask>>,
    },
    List {
        reply: oneshot::Sender<Vec<DownloadTask>>,
    },
    /// Resolves once the task is terminal
    Wait {
        id: DownloadId,
        reply: oneshot::Sender<Option<DownloadTask>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Reports from a task worker; `generation` tells stale workers apart
#[derive(Debug)]
pub(crate) struct WorkerMessage {
    pub id: DownloadId,
    pub generation: u64,
    pub update: WorkerUpdate,
}

#[derive(Debug)]
pub(crate) enum WorkerUpdate {
    AttemptStarted {
        attempt: u32,
        resume_offset: u64,
    },
    Progress(TransferProgress),
    Retrying {
        attempt: u32,
        delay: Duration,
        error: Error,
    },
    /// The worker extracts only once the actor answers `true`, so the final
    /// download progress is published before any extraction event
    Downloaded {
        bytes_received: u64,
        total_bytes: Option<u64>,
        extract: oneshot::Sender<bool>,
    },
    Interrupted {
        bytes_received: u64,
    },
    Failed {
        error: Error,
        bytes_persisted: u64,
    },
    Extracted(Result<ExtractionReport, Error>),
    /// Always the last message of a worker
    Exited,
}
