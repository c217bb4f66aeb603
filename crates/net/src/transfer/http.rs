//! HTTP implementation of the transfer engine

use super::range::{effective_offset, ContentRange};
use super::validation::{plan_response, validate_url, ResponsePlan};
use super::{TransferError, TransferOutcome, TransferProgress, Transport, TransferRequest};
use crate::client::{map_reqwest_error, retry_after_secs, NetClient};
use async_trait::async_trait;
use fetchup_config::NetworkConfig;
use fetchup_errors::{Error, NetworkError};
use futures::StreamExt;
use reqwest::header::RANGE;
use reqwest::{Response, StatusCode};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter, SeekFrom};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tuning for a single transfer attempt
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Fail the attempt when no bytes arrive within this window
    pub idle_timeout: Duration,
    /// Minimum spacing between progress notifications
    pub progress_interval: Duration,
    pub buffer_size: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for TransferConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            progress_interval: config.progress_interval(),
            buffer_size: config.buffer_size,
        }
    }
}

/// Transfer engine backed by [`NetClient`]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: NetClient,
    config: TransferConfig,
}

/// Response accepted for streaming, with the byte it starts at
struct Accepted {
    response: Response,
    start: u64,
    total: Option<u64>,
}

enum Opened {
    Stream(Accepted),
    /// The file on disk already holds the whole body
    AlreadyComplete(u64),
    Cancelled,
}

impl HttpTransport {
    #[must_use]
    pub fn new(client: NetClient, config: TransferConfig) -> Self {
        Self { client, config }
    }

    /// Build from the `[network]` configuration section
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_config(config: &NetworkConfig) -> Result<Self, Error> {
        let client = NetClient::new(config.into())?;
        Ok(Self::new(client, TransferConfig::from(config)))
    }

    async fn send(
        &self,
        request: &TransferRequest,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<Response>, Error> {
        let mut builder = self.client.request(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if offset > 0 {
            builder = builder.header(RANGE, format!("bytes={offset}-"));
        }

        tokio::select! {
            () = cancel.cancelled() => Ok(None),
            result = tokio::time::timeout(self.config.idle_timeout, builder.send()) => match result {
                Ok(Ok(response)) => Ok(Some(response)),
                Ok(Err(e)) => Err(map_reqwest_error(&e)),
                Err(_) => Err(self.timeout_error(&request.url)),
            },
        }
    }

    /// Issue the request and decide where in the file the body lands
    async fn open(
        &self,
        request: &TransferRequest,
        offset: u64,
        cancel: &CancellationToken,
    ) -> Result<Opened, Error> {
        let Some(response) = self.send(request, offset, cancel).await? else {
            return Ok(Opened::Cancelled);
        };
        let plan = match plan_response(response.status(), offset > 0) {
            Ok(plan) => plan,
            Err(Error::Network(NetworkError::RateLimited { .. })) => {
                return Err(NetworkError::RateLimited {
                    seconds: retry_after_secs(&response),
                }
                .into());
            }
            Err(e) => return Err(e),
        };

        match plan {
            ResponsePlan::Append => {
                let range = ContentRange::from_headers(response.headers());
                if let Some(start) = range.and_then(|r| r.start) {
                    if start != offset {
                        return Err(NetworkError::DownloadFailed(format!(
                            "server resumed at byte {start}, expected {offset}"
                        ))
                        .into());
                    }
                }
                let total = range
                    .and_then(|r| r.total)
                    .or_else(|| response.content_length().map(|len| len + offset));
                Ok(Opened::Stream(Accepted {
                    response,
                    start: offset,
                    total,
                }))
            }
            ResponsePlan::Retry416 => {
                let total = ContentRange::from_headers(response.headers()).and_then(|r| r.total);
                if total == Some(offset) {
                    debug!(download_id = %request.task_id, bytes = offset, "partial file already complete");
                    return Ok(Opened::AlreadyComplete(offset));
                }
                warn!(download_id = %request.task_id, offset, "range not satisfiable, restarting from zero");
                let Some(response) = self.send(request, 0, cancel).await? else {
                    return Ok(Opened::Cancelled);
                };
                if !response.status().is_success() {
                    return Err(status_error(response.status(), &response));
                }
                let total = response.content_length();
                Ok(Opened::Stream(Accepted {
                    response,
                    start: 0,
                    total,
                }))
            }
            ResponsePlan::Restart => {
                if offset > 0 {
                    warn!(download_id = %request.task_id, offset, "server ignored range request, restarting from zero");
                }
                let total = response.content_length();
                Ok(Opened::Stream(Accepted {
                    response,
                    start: 0,
                    total,
                }))
            }
        }
    }

    async fn stream_body(
        &self,
        request: &TransferRequest,
        accepted: Accepted,
        progress: &UnboundedSender<TransferProgress>,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, TransferError> {
        let Accepted {
            response,
            start,
            total,
        } = accepted;
        let path = request.destination.as_path();
        let id = &request.task_id;

        let file = open_destination(path, start)
            .await
            .map_err(|e| TransferError::new(id, e, start))?;
        let mut writer = BufWriter::with_capacity(self.config.buffer_size, file);
        let mut stream = response.bytes_stream();
        let mut received = start;
        let mut last_report = Instant::now();

        let _ = progress.send(TransferProgress {
            bytes_received: received,
            total_bytes: total,
        });

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let persisted = finish(writer, path, received, start).await;
                    debug!(download_id = %id, bytes = persisted, "transfer interrupted");
                    return Ok(TransferOutcome::Interrupted { bytes_received: persisted });
                }
                next = tokio::time::timeout(self.config.idle_timeout, stream.next()) => next,
            };

            match next {
                Ok(Some(Ok(chunk))) => {
                    if let Err(e) = writer.write_all(&chunk).await {
                        let persisted = finish(writer, path, received, start).await;
                        return Err(TransferError::new(id, Error::io_with_path(&e, path), persisted));
                    }
                    received += chunk.len() as u64;

                    if should_report_progress(&last_report, self.config.progress_interval) {
                        let _ = progress.send(TransferProgress {
                            bytes_received: received,
                            total_bytes: total,
                        });
                        last_report = Instant::now();
                    }
                }
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    let persisted = finish(writer, path, received, start).await;
                    return Err(TransferError::new(
                        id,
                        NetworkError::DownloadFailed(e.to_string()),
                        persisted,
                    ));
                }
                Err(_) => {
                    let persisted = finish(writer, path, received, start).await;
                    return Err(TransferError::new(id, self.timeout_error(&request.url), persisted));
                }
            }
        }

        if let Err(e) = flush_and_sync(writer).await {
            return Err(TransferError::new(id, Error::io_with_path(&e, path), start));
        }
        let _ = progress.send(TransferProgress {
            bytes_received: received,
            total_bytes: total,
        });

        if let Some(expected) = total {
            if received < expected {
                return Err(TransferError::new(
                    id,
                    NetworkError::DownloadFailed(format!(
                        "connection closed after {received} of {expected} bytes"
                    )),
                    received,
                ));
            }
        }

        debug!(download_id = %id, bytes = received, "transfer complete");
        Ok(TransferOutcome::Complete {
            bytes_received: received,
            total_bytes: total,
        })
    }

    fn timeout_error(&self, url: &str) -> Error {
        NetworkError::Timeout {
            url: url.to_string(),
            seconds: self.config.idle_timeout.as_secs(),
        }
        .into()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn transfer(
        &self,
        request: TransferRequest,
        progress: UnboundedSender<TransferProgress>,
        cancel: CancellationToken,
    ) -> Result<TransferOutcome, TransferError> {
        let id = request.task_id.clone();
        let offset = effective_offset(&request.destination, request.resume_offset)
            .await
            .map_err(|e| TransferError::new(&id, e, 0))?;
        validate_url(&request.url).map_err(|e| TransferError::new(&id, e, offset))?;

        debug!(download_id = %id, url = %request.url, offset, "starting transfer");

        match self.open(&request, offset, &cancel).await {
            Ok(Opened::Stream(accepted)) => {
                self.stream_body(&request, accepted, &progress, &cancel)
                    .await
            }
            Ok(Opened::AlreadyComplete(bytes)) => {
                let _ = progress.send(TransferProgress {
                    bytes_received: bytes,
                    total_bytes: Some(bytes),
                });
                Ok(TransferOutcome::Complete {
                    bytes_received: bytes,
                    total_bytes: Some(bytes),
                })
            }
            Ok(Opened::Cancelled) => Ok(TransferOutcome::Interrupted {
                bytes_received: offset,
            }),
            Err(e) => Err(TransferError::new(&id, e, offset)),
        }
    }
}

fn status_error(status: StatusCode, response: &Response) -> Error {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return NetworkError::RateLimited {
            seconds: retry_after_secs(response),
        }
        .into();
    }
    NetworkError::HttpError {
        status: status.as_u16(),
        message: status.to_string(),
    }
    .into()
}

/// Open the destination so writes begin at `start`, dropping anything past it
async fn open_destination(path: &Path, start: u64) -> Result<File, Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io_with_path(&e, parent))?;
    }

    if start == 0 {
        return File::create(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path));
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    file.set_len(start)
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    file.seek(SeekFrom::End(0))
        .await
        .map_err(|e| Error::io_with_path(&e, path))?;
    Ok(file)
}

async fn flush_and_sync(mut writer: BufWriter<File>) -> std::io::Result<()> {
    writer.flush().await?;
    writer.get_ref().sync_data().await
}

/// Flush what was received and report how much is durable
async fn finish(writer: BufWriter<File>, path: &Path, received: u64, start: u64) -> u64 {
    match flush_and_sync(writer).await {
        Ok(()) => received,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to flush partial download");
            start
        }
    }
}

fn should_report_progress(last_update: &Instant, interval: Duration) -> bool {
    last_update.elapsed() >= interval
}
