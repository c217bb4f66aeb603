//! Resumable single-file transfer engine
//!
//! A transfer writes one URL to one destination file, appending from a
//! resume offset when the server honours byte ranges. Retrying is left to
//! the caller: every failure comes back as a [`TransferError`] carrying the
//! number of bytes that are safely on disk.

mod http;
mod range;
mod validation;

pub use http::{HttpTransport, TransferConfig};
pub use range::ContentRange;
pub use validation::validate_url;

use async_trait::async_trait;
use fetchup_errors::Error;
use fetchup_types::DownloadId;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// One transfer attempt
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub task_id: DownloadId,
    pub url: String,
    /// Full path of the file being written
    pub destination: PathBuf,
    pub headers: BTreeMap<String, String>,
    /// Bytes already on disk from an earlier attempt
    pub resume_offset: u64,
}

/// Coalesced progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_received: u64,
    pub total_bytes: Option<u64>,
}

/// How an attempt ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The whole body is on disk
    Complete {
        bytes_received: u64,
        total_bytes: Option<u64>,
    },
    /// Stopped by the cancellation token; bytes up to here are flushed
    Interrupted { bytes_received: u64 },
}

/// A failed transfer attempt
#[derive(Debug, Clone, thiserror::Error)]
#[error("transfer {task_id} failed: {error}")]
pub struct TransferError {
    pub task_id: DownloadId,
    pub error: Error,
    /// Bytes flushed to the destination before the failure
    pub bytes_persisted: u64,
}

impl TransferError {
    pub(crate) fn new(task_id: &DownloadId, error: impl Into<Error>, bytes_persisted: u64) -> Self {
        Self {
            task_id: task_id.clone(),
            error: error.into(),
            bytes_persisted,
        }
    }
}

/// Something that can move bytes from a URL into a file
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run one attempt.
    ///
    /// Progress is sent at a bounded rate and never decreases within an
    /// attempt, except that a server ignoring the range request restarts the
    /// count at zero. Cancelling `cancel` stops the attempt promptly and
    /// yields [`TransferOutcome::Interrupted`].
    async fn transfer(
        &self,
        request: TransferRequest,
        progress: UnboundedSender<TransferProgress>,
        cancel: CancellationToken,
    ) -> Result<TransferOutcome, TransferError>;
}
