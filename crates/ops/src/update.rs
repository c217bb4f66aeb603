//! Self-update operations

use crate::command::{DownloadUpdateArgs, InstallUpdateArgs};
use crate::OpsCtx;
use fetchup_errors::Error;
use fetchup_types::{
    Backup, InstallReport, RollbackReport, UpdateCheck, UpdatePackage, Version,
};
use std::path::Path;

/// # Errors
///
/// Returns an error if no version source is configured or it fails.
pub async fn check_for_updates(ctx: &OpsCtx) -> Result<UpdateCheck, Error> {
    ctx.installer.check_for_updates().await
}

/// Download and verify a release package
///
/// # Errors
///
/// Returns `InstallError::InvalidRelease` for a malformed version, or the
/// download or checksum failure.
pub async fn download_update(
    ctx: &OpsCtx,
    args: DownloadUpdateArgs,
) -> Result<UpdatePackage, Error> {
    let package = UpdatePackage {
        version: Version::parse(args.version.trim_start_matches('v'))?,
        download_url: args.download_url,
        checksum: args.checksum,
        local_path: None,
    };
    ctx.installer.download_update(&package).await
}

/// # Errors
///
/// Returns the install failure, after an automatic rollback when one ran.
pub async fn install_update(ctx: &OpsCtx, args: InstallUpdateArgs) -> Result<InstallReport, Error> {
    ctx.installer
        .install_update(&args.file_path, args.backup_path, args.checksum.as_deref())
        .await
}

/// # Errors
///
/// Returns `InstallError::BackupNotFound` or `InstallError::RollbackFailed`.
pub async fn rollback_update(ctx: &OpsCtx, backup_path: &Path) -> Result<RollbackReport, Error> {
    ctx.installer.rollback_update(backup_path).await
}

pub async fn get_backups(ctx: &OpsCtx) -> Vec<Backup> {
    ctx.installer.get_backups().await
}

/// Mark the running version as good; its rollback target becomes obsolete
///
/// # Errors
///
/// Returns an error if an install is running or the registry cannot be saved.
pub async fn confirm_install(ctx: &OpsCtx) -> Result<Option<Backup>, Error> {
    ctx.installer.confirm_install().await
}
