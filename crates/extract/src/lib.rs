#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Archive extraction pipeline for fetchup
//!
//! Unpacks zip, tar and tar.gz archives into a destination directory.
//! Extraction is two-pass: every entry is listed and validated first, and
//! only a fully validated archive is written. Cancellation is observed
//! between entries. The archive itself is only removed by
//! [`extract_and_delete`] after a successful extraction.

pub mod safety;
mod tarball;
mod zipfile;

pub use safety::{
    validate_hardlink_target, validate_safe_path, validate_symlink_target, PlannedLinks,
};

use fetchup_errors::{Error, ExtractError};
use fetchup_events::{EventBus, EventEmitter, ExtractEvent, FailureContext};
use fetchup_types::{ArchiveFormat, DownloadId, ExtractionReport};
use std::io;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Who is extracting, where events go, and how to stop
#[derive(Clone, Default)]
pub struct ExtractContext {
    /// Download that produced the archive, if any
    pub id: Option<DownloadId>,
    pub events: Option<EventBus>,
    pub cancel: CancellationToken,
}

impl ExtractContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_id(mut self, id: DownloadId) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn entry_extracted(&self, entry: &Path, index: usize, total: usize) {
        self.emit_extract(ExtractEvent::EntryExtracted {
            id: self.id.clone(),
            entry: entry.display().to_string(),
            index: index + 1,
            total,
        });
    }

    fn check_cancelled(&self, archive: &Path) -> Result<(), Error> {
        if self.cancel.is_cancelled() {
            return Err(ExtractError::Cancelled {
                path: archive.display().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl EventEmitter for ExtractContext {
    fn event_bus(&self) -> Option<&EventBus> {
        self.events.as_ref()
    }
}

/// Counts produced by a format backend
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Unpacked {
    pub entries: usize,
    pub bytes: u64,
}

/// Extract an archive into `destination`, keeping the archive
///
/// # Errors
///
/// Returns `ArchiveNotFound`, `UnsupportedFormat`, `Corrupt`, `UnsafePath`,
/// `InsufficientSpace` or `Cancelled`. The archive is never modified.
pub async fn extract(
    archive: &Path,
    destination: &Path,
    ctx: &ExtractContext,
) -> Result<ExtractionReport, Error> {
    let result = run(archive, destination, ctx).await;
    match &result {
        Ok(report) => {
            info!(
                archive = %archive.display(),
                destination = %destination.display(),
                entries = report.entries,
                bytes = report.bytes_written,
                "archive extracted"
            );
            ctx.emit_extract(ExtractEvent::Completed {
                id: ctx.id.clone(),
                archive: archive.to_path_buf(),
                destination_path: destination.to_path_buf(),
                entries: report.entries,
            });
        }
        Err(e) => {
            warn!(archive = %archive.display(), error = %e, "extraction failed");
            ctx.emit_extract(ExtractEvent::Failed {
                id: ctx.id.clone(),
                archive: archive.to_path_buf(),
                failure: FailureContext::from_error(e),
            });
        }
    }
    result
}

/// Extract an archive and delete it once extraction succeeded
///
/// # Errors
///
/// Same as [`extract`]; on failure the archive is preserved.
pub async fn extract_and_delete(
    archive: &Path,
    destination: &Path,
    ctx: &ExtractContext,
) -> Result<ExtractionReport, Error> {
    let mut report = extract(archive, destination, ctx).await?;
    match tokio::fs::remove_file(archive).await {
        Ok(()) => report.archive_deleted = true,
        Err(e) => {
            warn!(archive = %archive.display(), error = %e, "could not delete extracted archive");
        }
    }
    Ok(report)
}

async fn run(
    archive: &Path,
    destination: &Path,
    ctx: &ExtractContext,
) -> Result<ExtractionReport, Error> {
    match tokio::fs::metadata(archive).await {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => {
            return Err(ExtractError::ArchiveNotFound {
                path: archive.display().to_string(),
            }
            .into())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ExtractError::ArchiveNotFound {
                path: archive.display().to_string(),
            }
            .into())
        }
        Err(e) => return Err(Error::io_with_path(&e, archive)),
    }

    let format = ArchiveFormat::from_path(archive).ok_or_else(|| ExtractError::UnsupportedFormat {
        path: archive.display().to_string(),
    })?;

    ctx.emit_extract(ExtractEvent::Started {
        id: ctx.id.clone(),
        archive: archive.to_path_buf(),
        destination_path: destination.to_path_buf(),
    });
    debug!(archive = %archive.display(), ?format, "extracting");

    let archive_buf = archive.to_path_buf();
    let dest_buf = destination.to_path_buf();
    let blocking_ctx = ctx.clone();

    let unpacked = tokio::task::spawn_blocking(move || {
        unpack_blocking(format, &archive_buf, &dest_buf, &blocking_ctx)
    })
    .await
    .map_err(|e| Error::internal(format!("extract task failed: {e}")))??;

    Ok(ExtractionReport {
        archive: archive.to_path_buf(),
        destination: destination.to_path_buf(),
        format,
        entries: unpacked.entries,
        bytes_written: unpacked.bytes,
        archive_deleted: false,
    })
}

fn unpack_blocking(
    format: ArchiveFormat,
    archive: &Path,
    destination: &Path,
    ctx: &ExtractContext,
) -> Result<Unpacked, Error> {
    let created_destination = !destination.exists();
    let result = match format {
        ArchiveFormat::Zip => zipfile::unpack(archive, destination, ctx),
        ArchiveFormat::Tar | ArchiveFormat::TarGz => tarball::unpack(format, archive, destination, ctx),
    };

    if result.is_err() && created_destination && destination.exists() {
        if let Err(e) = std::fs::remove_dir_all(destination) {
            warn!(destination = %destination.display(), error = %e, "could not clean up partial extraction");
        }
    }
    result
}

fn create_destination(destination: &Path) -> Result<(), Error> {
    std::fs::create_dir_all(destination).map_err(|e| write_error(&e, destination))
}

/// Refuse to write an entry through a symlink already on disk
///
/// `include_self` also rejects an existing symlink at the entry path, which
/// would otherwise be followed when a file is created.
pub(crate) fn ensure_no_symlink_ancestors(
    destination: &Path,
    relative: &Path,
    include_self: bool,
    archive: &Path,
    entry: &str,
) -> Result<(), Error> {
    let skip = usize::from(!include_self);
    for ancestor in relative.ancestors().skip(skip) {
        if ancestor.as_os_str().is_empty() {
            continue;
        }
        let on_disk = destination.join(ancestor);
        match std::fs::symlink_metadata(&on_disk) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(unsafe_entry(
                    archive,
                    entry,
                    format!("{} is a symlink", ancestor.display()),
                ));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io_with_path(&e, &on_disk)),
        }
    }
    Ok(())
}

/// Unsafe entry rejection
pub(crate) fn unsafe_entry(archive: &Path, entry: &str, reason: String) -> Error {
    ExtractError::UnsafePath {
        path: archive.display().to_string(),
        entry: entry.to_string(),
        reason,
    }
    .into()
}

/// Archive could not be read
pub(crate) fn corrupt(archive: &Path, message: impl ToString) -> Error {
    ExtractError::Corrupt {
        path: archive.display().to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Classify a failure writing into the destination
pub(crate) fn write_error(err: &io::Error, path: &Path) -> Error {
    if err.kind() == io::ErrorKind::StorageFull {
        ExtractError::InsufficientSpace {
            path: path.display().to_string(),
        }
        .into()
    } else {
        Error::io_with_path(err, path)
    }
}

