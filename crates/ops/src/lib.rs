#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Boundary operations for fetchup
//!
//! This crate sits between the host (CLI or JSON-lines server) and the
//! download and update crates. Every boundary [`Command`] is executed
//! against an [`OpsCtx`] and produces an [`OperationResult`]; events are
//! translated for the wire by [`wire`].

mod command;
mod context;
mod downloads;
mod update;
pub mod wire;

pub use command::{
    Command, DownloadFileArgs, DownloadIdArgs, DownloadUpdateArgs, ExtractArgs,
    InstallUpdateArgs, RollbackUpdateArgs,
};
pub use context::{OpsContextBuilder, OpsCtx};

pub use downloads::{
    cancel_download, download_file, extract_archive_and_delete, get_download, list_downloads,
    pause_download, remove_download, resume_download,
};
pub use update::{
    check_for_updates, confirm_install, download_update, get_backups, install_update,
    rollback_update,
};

use fetchup_errors::Error;
use fetchup_types::{
    Backup, CommandOutcome, DownloadTask, ExtractionReport, InstallReport, RollbackReport,
    UpdateCheck, UpdatePackage,
};
use tracing::{debug, warn};

/// Operation result that can be serialized for the boundary
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum OperationResult {
    /// A single task snapshot
    Download(DownloadTask),
    /// Acknowledgement of pause, resume, cancel or remove
    Command(CommandOutcome),
    Downloads(Vec<DownloadTask>),
    UpdateCheck(UpdateCheck),
    /// A downloaded and verified package
    UpdatePackage(UpdatePackage),
    Install(InstallReport),
    Rollback(RollbackReport),
    Backups(Vec<Backup>),
    /// Backup released by `confirm-install`, if there was one
    Confirmed(Option<Backup>),
    Extraction(ExtractionReport),
}

impl OperationResult {
    /// Convert to JSON string
    ///
    /// # Errors
    ///
    /// Returns an error if the result cannot be serialized.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Run one boundary command
///
/// # Errors
///
/// Returns the failure of the underlying operation.
pub async fn execute(ctx: &OpsCtx, command: Command) -> Result<OperationResult, Error> {
    let name = command.name();
    debug!(command = name, "executing command");

    let result = match command {
        Command::DownloadFile(args) => download_file(ctx, args)
            .await
            .map(OperationResult::Download),
        Command::PauseDownload(args) => pause_download(ctx, &args.download_id)
            .await
            .map(OperationResult::Command),
        Command::ResumeDownload(args) => resume_download(ctx, &args.download_id)
            .await
            .map(OperationResult::Command),
        Command::CancelDownload(args) => cancel_download(ctx, &args.download_id)
            .await
            .map(OperationResult::Command),
        Command::RemoveDownload(args) => remove_download(ctx, &args.download_id)
            .await
            .map(OperationResult::Command),
        Command::GetDownload(args) => get_download(ctx, &args.download_id)
            .await
            .map(OperationResult::Download),
        Command::ListDownloads => list_downloads(ctx).await.map(OperationResult::Downloads),
        Command::CheckForUpdates => check_for_updates(ctx)
            .await
            .map(OperationResult::UpdateCheck),
        Command::DownloadUpdate(args) => download_update(ctx, args)
            .await
            .map(OperationResult::UpdatePackage),
        Command::InstallUpdate(args) => install_update(ctx, args)
            .await
            .map(OperationResult::Install),
        Command::RollbackUpdate(args) => rollback_update(ctx, &args.backup_path)
            .await
            .map(OperationResult::Rollback),
        Command::ConfirmInstall => confirm_install(ctx).await.map(OperationResult::Confirmed),
        Command::GetBackups => Ok(OperationResult::Backups(get_backups(ctx).await)),
        Command::ExtractArchiveAndDelete(args) => extract_archive_and_delete(ctx, &args)
            .await
            .map(OperationResult::Extraction),
    };

    if let Err(e) = &result {
        warn!(command = name, kind = %e.kind(), error = %e, "command failed");
    }
    result
}
