//! Download and archive operations

use crate::command::{DownloadFileArgs, ExtractArgs};
use crate::OpsCtx;
use fetchup_errors::{DownloadError, Error};
use fetchup_extract::ExtractContext;
use fetchup_types::{CommandOutcome, DownloadId, DownloadRequest, DownloadTask, ExtractionReport};
use tracing::{debug, info};

/// Queue a download and return its task
///
/// # Errors
///
/// Returns an error if the request is invalid or the id is already active.
pub async fn download_file(ctx: &OpsCtx, args: DownloadFileArgs) -> Result<DownloadTask, Error> {
    if args.show_directory_selector {
        debug!(url = %args.url, "directory selection is left to the caller; using the given destination");
    }
    let task = ctx
        .downloads
        .start_download(DownloadRequest::from(args))
        .await?;
    info!(download_id = %task.id, url = %task.url, "download queued");
    Ok(task)
}

/// # Errors
///
/// Returns `DownloadError::TaskNotFound` for unknown ids.
pub async fn pause_download(ctx: &OpsCtx, id: &DownloadId) -> Result<CommandOutcome, Error> {
    found(id, ctx.downloads.pause(id).await?)
}

/// # Errors
///
/// Returns `DownloadError::TaskNotFound` for unknown ids.
pub async fn resume_download(ctx: &OpsCtx, id: &DownloadId) -> Result<CommandOutcome, Error> {
    found(id, ctx.downloads.resume(id).await?)
}

/// # Errors
///
/// Returns `DownloadError::TaskNotFound` for unknown ids.
pub async fn cancel_download(ctx: &OpsCtx, id: &DownloadId) -> Result<CommandOutcome, Error> {
    found(id, ctx.downloads.cancel(id).await?)
}

/// Forget a terminal task
///
/// # Errors
///
/// Returns `DownloadError::TaskNotFound` for unknown ids.
pub async fn remove_download(ctx: &OpsCtx, id: &DownloadId) -> Result<CommandOutcome, Error> {
    found(id, ctx.downloads.remove(id).await?)
}

/// # Errors
///
/// Returns `DownloadError::TaskNotFound` for unknown ids.
pub async fn get_download(ctx: &OpsCtx, id: &DownloadId) -> Result<DownloadTask, Error> {
    ctx.downloads
        .get(id)
        .await?
        .ok_or_else(|| not_found(id))
}

/// # Errors
///
/// Returns an error if the download manager stopped.
pub async fn list_downloads(ctx: &OpsCtx) -> Result<Vec<DownloadTask>, Error> {
    ctx.downloads.list().await
}

/// Extract an archive, deleting it only when extraction succeeded
///
/// # Errors
///
/// Returns the extraction error; the archive is preserved in that case.
pub async fn extract_archive_and_delete(
    ctx: &OpsCtx,
    args: &ExtractArgs,
) -> Result<ExtractionReport, Error> {
    let extract_ctx = ExtractContext::new().with_events(ctx.events.clone());
    fetchup_extract::extract_and_delete(&args.archive_path, &args.destination_path, &extract_ctx)
        .await
}

fn found(id: &DownloadId, outcome: CommandOutcome) -> Result<CommandOutcome, Error> {
    match outcome {
        CommandOutcome::NotFound => Err(not_found(id)),
        other => Ok(other),
    }
}

fn not_found(id: &DownloadId) -> Error {
    DownloadError::TaskNotFound { id: id.to_string() }.into()
}
