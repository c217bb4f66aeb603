//! Backup registry persisted as `backups.json`

use fetchup_errors::{Error, StorageError};
use fetchup_types::{Backup, BackupStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct BackupManifest {
    version: u32,
    backups: Vec<Backup>,
}

/// Known backups, oldest first
#[derive(Debug)]
pub struct BackupRegistry {
    manifest: PathBuf,
    backups: Vec<Backup>,
}

impl BackupRegistry {
    /// Load the registry; a missing manifest is an empty registry
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest exists but cannot be read or parsed.
    pub async fn load(manifest: impl Into<PathBuf>) -> Result<Self, Error> {
        let manifest = manifest.into();
        let backups = match fs::read(&manifest).await {
            Ok(data) => {
                let file: BackupManifest =
                    serde_json::from_slice(&data).map_err(|e| StorageError::CorruptedData {
                        message: format!("{}: {e}", manifest.display()),
                    })?;
                file.backups
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::io_with_path(&e, &manifest)),
        };
        debug!(path = %manifest.display(), count = backups.len(), "loaded backup registry");
        Ok(Self { manifest, backups })
    }

    #[must_use]
    pub fn backups(&self) -> &[Backup] {
        &self.backups
    }

    #[must_use]
    pub fn rollback_target(&self) -> Option<&Backup> {
        self.backups
            .iter()
            .rev()
            .find(|backup| backup.status == BackupStatus::RollbackTarget)
    }

    /// Register a fresh backup as the only rollback target
    pub fn register(&mut self, backup: Backup) {
        for older in &mut self.backups {
            if older.status == BackupStatus::RollbackTarget {
                older.status = BackupStatus::Obsolete;
            }
        }
        self.backups.push(backup);
    }

    /// Set the status of the backup stored at `path`, if registered
    pub fn mark(&mut self, path: &Path, status: BackupStatus) -> Option<&Backup> {
        let backup = self.backups.iter_mut().find(|backup| backup.path == path)?;
        backup.status = status;
        Some(backup)
    }

    /// Drop the record for `path` without touching the directory
    pub fn forget(&mut self, path: &Path) {
        self.backups.retain(|backup| backup.path != path);
    }

    /// Remove the oldest backups beyond `keep`, never the rollback target.
    ///
    /// Returns the directories that were deleted.
    pub async fn prune(&mut self, keep: usize) -> Vec<PathBuf> {
        let mut removed = Vec::new();
        while self.backups.len() > keep {
            let Some(index) = self
                .backups
                .iter()
                .position(|backup| backup.status != BackupStatus::RollbackTarget)
            else {
                break;
            };
            let backup = self.backups.remove(index);
            match fs::remove_dir_all(&backup.path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %backup.path.display(), error = %e, "failed to delete pruned backup");
                }
            }
            info!(path = %backup.path.display(), version = %backup.source_version, "pruned backup");
            removed.push(backup.path);
        }
        removed
    }

    /// Write the manifest with a temp file and a rename
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be written durably.
    pub async fn save(&self) -> Result<(), Error> {
        let json = serde_json::to_vec_pretty(&BackupManifest {
            version: FORMAT_VERSION,
            backups: self.backups.clone(),
        })?;

        if let Some(parent) = self.manifest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_with_path(&e, parent))?;
        }

        let tmp = self.manifest.with_extension("json.tmp");
        let mut out = fs::File::create(&tmp)
            .await
            .map_err(|e| Error::io_with_path(&e, &tmp))?;
        out.write_all(&json)
            .await
            .map_err(|e| Error::io_with_path(&e, &tmp))?;
        out.sync_all()
            .await
            .map_err(|e| Error::io_with_path(&e, &tmp))?;
        drop(out);

        fs::rename(&tmp, &self.manifest)
            .await
            .map_err(|e| Error::io_with_path(&e, &self.manifest))
    }
}
