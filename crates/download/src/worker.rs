//! One task's transfer attempts and optional extraction

use crate::command::{WorkerMessage, WorkerUpdate};
use fetchup_config::RetryConfig;
use fetchup_errors::{Error, NetworkError};
use fetchup_events::EventBus;
use fetchup_extract::{extract_and_delete, ExtractContext};
use fetchup_net::retry::{calculate_backoff_delay, is_transient};
use fetchup_net::{TransferOutcome, TransferRequest, Transport};
use fetchup_types::{DownloadId, DownloadTask};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything a worker needs, detached from the registry
pub(crate) struct WorkerJob {
    pub generation: u64,
    pub request: TransferRequest,
    pub auto_extract: bool,
    pub extract_dir: PathBuf,
    pub retry: RetryConfig,
    pub cancel: CancellationToken,
    pub events: EventBus,
}

impl WorkerJob {
    pub fn new(
        task: &DownloadTask,
        generation: u64,
        retry: RetryConfig,
        cancel: CancellationToken,
        events: EventBus,
    ) -> Self {
        Self {
            generation,
            request: TransferRequest {
                task_id: task.id.clone(),
                url: task.url.clone(),
                destination: task.file_path(),
                headers: task.headers.clone(),
                resume_offset: task.bytes_received,
            },
            auto_extract: task.auto_extract,
            extract_dir: task.extract_dir(),
            retry,
            cancel,
            events,
        }
    }
}

struct Reporter {
    tx: UnboundedSender<WorkerMessage>,
    job_id: DownloadId,
    generation: u64,
}

impl Reporter {
    fn send(&self, update: WorkerUpdate) {
        // The actor only goes away on shutdown, after it stopped listening
        let _ = self.tx.send(WorkerMessage {
            id: self.job_id.clone(),
            generation: self.generation,
            update,
        });
    }
}

/// Run the job to completion, always ending with [`WorkerUpdate::Exited`]
pub(crate) async fn run(
    job: WorkerJob,
    transport: Arc<dyn Transport>,
    tx: UnboundedSender<WorkerMessage>,
) {
    let reporter = Reporter {
        tx,
        job_id: job.request.task_id.clone(),
        generation: job.generation,
    };

    let Some(go_ahead) = transfer_with_retries(&job, transport.as_ref(), &reporter).await else {
        reporter.send(WorkerUpdate::Exited);
        return;
    };
    // A dropped sender means the actor moved on: stale, paused or cancelled
    if go_ahead.await.unwrap_or(false) && !job.cancel.is_cancelled() {
        let ctx = ExtractContext::new()
            .with_id(job.request.task_id.clone())
            .with_events(job.events.clone())
            .with_cancel(job.cancel.clone());
        let result = extract_and_delete(&job.request.destination, &job.extract_dir, &ctx).await;
        reporter.send(WorkerUpdate::Extracted(result));
    }

    reporter.send(WorkerUpdate::Exited);
}

/// Once the whole file is on disk, returns the actor's extraction verdict
async fn transfer_with_retries(
    job: &WorkerJob,
    transport: &dyn Transport,
    reporter: &Reporter,
) -> Option<oneshot::Receiver<bool>> {
    let max_attempts = job.retry.max_attempts.max(1);
    let mut resume_offset = job.request.resume_offset;

    for attempt in 1..=max_attempts {
        reporter.send(WorkerUpdate::AttemptStarted {
            attempt,
            resume_offset,
        });

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let forward_tx = reporter.tx.clone();
        let forward_id = reporter.job_id.clone();
        let generation = reporter.generation;
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                let _ = forward_tx.send(WorkerMessage {
                    id: forward_id.clone(),
                    generation,
                    update: WorkerUpdate::Progress(progress),
                });
            }
        });

        let mut request = job.request.clone();
        request.resume_offset = resume_offset;
        let result = transport
            .transfer(request, progress_tx, job.cancel.clone())
            .await;
        // Progress must reach the actor before the outcome
        let _ = forwarder.await;

        match result {
            Ok(TransferOutcome::Complete {
                bytes_received,
                total_bytes,
            }) => {
                let (extract, go_ahead) = oneshot::channel();
                reporter.send(WorkerUpdate::Downloaded {
                    bytes_received,
                    total_bytes,
                    extract,
                });
                return Some(go_ahead);
            }
            Ok(TransferOutcome::Interrupted { bytes_received }) => {
                reporter.send(WorkerUpdate::Interrupted { bytes_received });
                return None;
            }
            Err(failure) => {
                if job.cancel.is_cancelled() {
                    reporter.send(WorkerUpdate::Interrupted {
                        bytes_received: failure.bytes_persisted,
                    });
                    return None;
                }
                if attempt == max_attempts || !is_transient(&failure.error) {
                    warn!(download_id = %failure.task_id, attempt, error = %failure.error, "transfer failed");
                    reporter.send(WorkerUpdate::Failed {
                        error: failure.error,
                        bytes_persisted: failure.bytes_persisted,
                    });
                    return None;
                }

                let delay = retry_delay(&job.retry, attempt, &failure.error);
                debug!(download_id = %failure.task_id, attempt, ?delay, error = %failure.error, "retrying transfer");
                resume_offset = failure.bytes_persisted;
                reporter.send(WorkerUpdate::Retrying {
                    attempt,
                    delay,
                    error: failure.error,
                });

                tokio::select! {
                    () = job.cancel.cancelled() => {
                        reporter.send(WorkerUpdate::Interrupted { bytes_received: resume_offset });
                        return None;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    None
}

/// Backoff delay, stretched to honour a server's `Retry-After`
fn retry_delay(retry: &RetryConfig, attempt: u32, error: &Error) -> Duration {
    let backoff = calculate_backoff_delay(retry, attempt);
    match error {
        Error::Network(NetworkError::RateLimited { seconds }) => backoff.max(Duration::from_secs(*seconds)),
        _ => backoff,
    }
}
