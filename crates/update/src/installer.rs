//! Check, download, install and roll back updates

use crate::backup::BackupRegistry;
use crate::fsops::{copy_tree, count_files, discard, sibling_path, swap_in};
use crate::source::{HttpVersionSource, VersionSource};
use fetchup_config::constants::BACKUPS_MANIFEST;
use fetchup_config::Config;
use fetchup_download::DownloadManager;
use fetchup_errors::{Error, InstallError};
use fetchup_events::{
    AppEvent, DownloadEvent, EventBus, EventEmitter, FailureContext, Subscription, UpdateEvent,
    UpdateStage,
};
use fetchup_extract::ExtractContext;
use fetchup_net::NetClient;
use fetchup_types::{
    ArchiveFormat, Backup, BackupStatus, DownloadId, DownloadRequest, DownloadState, InstallReport,
    RollbackReport, UpdateCheck, UpdatePackage, Utc, Uuid, Version,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Locations and policy for the installer
#[derive(Debug, Clone)]
pub struct InstallerConfig {
    /// Directory holding the installed application
    pub install_dir: PathBuf,
    pub backup_dir: PathBuf,
    /// Where update packages are downloaded
    pub update_dir: PathBuf,
    pub current_version: Version,
    pub max_backups: usize,
}

impl InstallerConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            install_dir: config.install_dir(),
            backup_dir: config.backup_dir(),
            update_dir: config.update_dir(),
            current_version: config.update.current_version.clone(),
            max_backups: config.update.max_backups,
        }
    }
}

/// Update workflow owner
///
/// Installs, rollbacks and backup confirmation take the registry lock with
/// `try_lock`, so a second workflow started while one runs fails with
/// `InstallError::InProgress` instead of queueing behind it.
pub struct UpdateInstaller {
    config: InstallerConfig,
    source: Option<Arc<dyn VersionSource>>,
    downloads: DownloadManager,
    events: EventBus,
    registry: Mutex<BackupRegistry>,
    /// Packages fetched by `download_update`, keyed by path, with the
    /// checksum they were verified against
    verified: Mutex<HashMap<PathBuf, String>>,
}

impl std::fmt::Debug for UpdateInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateInstaller")
            .field("config", &self.config)
            .field("has_source", &self.source.is_some())
            .finish_non_exhaustive()
    }
}

impl EventEmitter for UpdateInstaller {
    fn event_bus(&self) -> Option<&EventBus> {
        Some(&self.events)
    }
}

impl UpdateInstaller {
    /// # Errors
    ///
    /// Returns an error if the backup manifest exists but cannot be read.
    pub async fn new(
        config: InstallerConfig,
        downloads: DownloadManager,
        source: Option<Arc<dyn VersionSource>>,
    ) -> Result<Self, Error> {
        let registry = BackupRegistry::load(config.backup_dir.join(BACKUPS_MANIFEST)).await?;
        Ok(Self {
            events: downloads.events().clone(),
            config,
            source,
            downloads,
            registry: Mutex::new(registry),
            verified: Mutex::new(HashMap::new()),
        })
    }

    /// Build from the application configuration, fetching release metadata
    /// from `update.manifest_url` when set
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the backup
    /// manifest cannot be read.
    pub async fn from_config(config: &Config, downloads: DownloadManager) -> Result<Self, Error> {
        let source: Option<Arc<dyn VersionSource>> = match &config.update.manifest_url {
            Some(url) => {
                let client = NetClient::new((&config.network).into())?;
                Some(Arc::new(HttpVersionSource::new(client, url.clone())))
            }
            None => None,
        };
        Self::new(InstallerConfig::from_config(config), downloads, source).await
    }

    #[must_use]
    pub fn config(&self) -> &InstallerConfig {
        &self.config
    }

    /// Ask the version source whether a newer release exists
    ///
    /// # Errors
    ///
    /// Returns an error if no source is configured or it fails.
    pub async fn check_for_updates(&self) -> Result<UpdateCheck, Error> {
        let current = self.config.current_version.clone();
        let Some(source) = &self.source else {
            return Err(self.fail(UpdateStage::Check, InstallError::NoVersionSource.into()));
        };

        self.emit_update(UpdateEvent::CheckStarted {
            current: current.clone(),
        });
        let package = source
            .latest()
            .await
            .map_err(|e| self.fail(UpdateStage::Check, e))?;

        if package.version > current {
            info!(%current, available = %package.version, "update available");
            self.emit_update(UpdateEvent::Available {
                current,
                available: package.version.clone(),
            });
            Ok(UpdateCheck::Available { package })
        } else {
            debug!(%current, latest = %package.version, "up to date");
            self.emit_update(UpdateEvent::UpToDate {
                current: current.clone(),
            });
            Ok(UpdateCheck::UpToDate { current })
        }
    }

    /// Download a package through the download manager and verify it.
    ///
    /// Progress is mirrored as `UpdateEvent::DownloadProgress`. On a
    /// checksum mismatch the artifact is deleted and nothing else happens.
    ///
    /// # Errors
    ///
    /// Returns an error if the download does not complete or the digest does
    /// not match the advertised checksum.
    pub async fn download_update(&self, package: &UpdatePackage) -> Result<UpdatePackage, Error> {
        let id = DownloadId::new(format!("update-{}", package.version));
        let request = DownloadRequest::new(&package.download_url)
            .with_id(id.clone())
            .with_destination(&self.config.update_dir);

        // Subscribe before starting so no progress is missed
        let subscription = self.events.subscribe();
        let task = match self.downloads.start_download(request).await {
            Ok(task) => task,
            Err(e) => {
                self.events.unsubscribe(subscription.id());
                return Err(self.fail(UpdateStage::Download, e));
            }
        };
        self.emit_update(UpdateEvent::DownloadStarted {
            version: package.version.clone(),
            id: id.clone(),
        });

        let mirror = tokio::spawn(mirror_progress(
            subscription,
            self.events.clone(),
            id.clone(),
            package.version.clone(),
        ));
        let finished = match self.downloads.wait(&id).await {
            Ok(finished) => finished,
            Err(e) => {
                mirror.abort();
                return Err(self.fail(UpdateStage::Download, e));
            }
        };
        // The terminal event precedes the wait resolving, so the mirror is done
        let _ = mirror.await;
        let _ = self.downloads.remove(&id).await;

        if finished.state != DownloadState::Completed {
            let err = InstallError::DownloadIncomplete {
                id: id.to_string(),
                state: finished.state.to_string(),
            };
            return Err(self.fail(UpdateStage::Download, err.into()));
        }

        let path = task.file_path();
        if let Err(e) = fetchup_hash::verify_checksum(&path, &package.checksum).await {
            error!(path = %path.display(), error = %e, "update package failed verification");
            if let Err(remove) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %remove, "failed to delete rejected package");
            }
            return Err(self.fail(UpdateStage::Verify, e));
        }

        let key = verified_key(&path).await;
        self.verified
            .lock()
            .await
            .insert(key, package.checksum.clone());
        info!(version = %package.version, path = %path.display(), "update package verified");
        self.emit_update(UpdateEvent::Verified {
            version: package.version.clone(),
            path: path.clone(),
        });
        Ok(UpdatePackage {
            local_path: Some(path),
            ..package.clone()
        })
    }

    /// Back up the installation, then apply `artifact` to it.
    ///
    /// The artifact is checked against `checksum`, or against the checksum
    /// it was verified with by [`Self::download_update`], before anything is
    /// touched. An artifact with neither is refused. Archives replace the whole installation tree; any other file
    /// replaces the same-named file in a copy of the current tree. If
    /// applying fails after the backup exists, the backup is restored
    /// automatically.
    ///
    /// # Errors
    ///
    /// Returns `NetworkError::ChecksumMismatch` or `InstallError::Unverified`
    /// without creating a backup, `InstallError::BackupFailed` if no backup could be made (the
    /// installation is untouched), `InstallError::RolledBack` if applying
    /// failed and the previous version was restored, or
    /// `InstallError::RollbackFailed` if restoring failed as well.
    pub async fn install_update(
        &self,
        artifact: &Path,
        backup_path: Option<PathBuf>,
        checksum: Option<&str>,
    ) -> Result<InstallReport, Error> {
        let started = Instant::now();
        let Ok(mut registry) = self.registry.try_lock() else {
            return Err(self.fail(UpdateStage::Install, InstallError::InProgress.into()));
        };

        let is_file = tokio::fs::metadata(artifact)
            .await
            .is_ok_and(|meta| meta.is_file());
        if !is_file {
            let err = InstallError::ArtifactNotFound {
                path: artifact.display().to_string(),
            };
            return Err(self.fail(UpdateStage::Install, err.into()));
        }

        let expected = match checksum {
            Some(checksum) => Some(checksum.to_string()),
            None => {
                let key = verified_key(artifact).await;
                self.verified.lock().await.get(&key).cloned()
            }
        };
        let Some(expected) = expected else {
            let err = InstallError::Unverified {
                path: artifact.display().to_string(),
            };
            return Err(self.fail(UpdateStage::Verify, err.into()));
        };
        if let Err(e) = fetchup_hash::verify_checksum(artifact, &expected).await {
            error!(artifact = %artifact.display(), error = %e, "refusing to install unverified artifact");
            return Err(self.fail(UpdateStage::Verify, e));
        }

        let install_dir = self.config.install_dir.clone();
        self.emit_update(UpdateEvent::Installing {
            artifact: artifact.to_path_buf(),
            install_dir: install_dir.clone(),
        });

        let backup = self
            .create_backup(&mut registry, backup_path)
            .await
            .map_err(|e| self.fail(UpdateStage::Backup, e))?;
        self.emit_update(UpdateEvent::BackupCreated {
            backup: backup.clone(),
        });

        match self.apply(artifact, &install_dir).await {
            Ok(files) => {
                info!(install_dir = %install_dir.display(), files, "update installed");
                self.emit_update(UpdateEvent::Installed {
                    install_dir: install_dir.clone(),
                    backup_path: backup.path.clone(),
                });
                registry.prune(self.config.max_backups).await;
                if let Err(e) = registry.save().await {
                    warn!(error = %e, "failed to persist backup registry after pruning");
                }
                Ok(InstallReport {
                    install_dir,
                    backup,
                    files,
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                })
            }
            Err(cause) => {
                error!(error = %cause, backup = %backup.path.display(), "install failed, rolling back");
                self.emit_update(UpdateEvent::Failed {
                    stage: UpdateStage::Install,
                    failure: FailureContext::from_error(&cause),
                });
                self.recover(&mut registry, &backup.path, &install_dir, Some(&cause))
                    .await
                    .map(|_| ())?;
                Err(InstallError::RolledBack {
                    cause: cause.to_string(),
                    backup_path: backup.path.display().to_string(),
                }
                .into())
            }
        }
    }

    /// Restore the installation from a backup directory.
    ///
    /// Works for any existing backup, registered or not.
    ///
    /// # Errors
    ///
    /// Returns `InstallError::BackupNotFound` if the backup does not exist,
    /// or `InstallError::RollbackFailed` if it could not be restored; the
    /// backup is left in place either way.
    pub async fn rollback_update(&self, backup_path: &Path) -> Result<RollbackReport, Error> {
        let Ok(mut registry) = self.registry.try_lock() else {
            return Err(self.fail(UpdateStage::Rollback, InstallError::InProgress.into()));
        };

        let is_dir = tokio::fs::metadata(backup_path)
            .await
            .is_ok_and(|meta| meta.is_dir());
        if !is_dir {
            let err = InstallError::BackupNotFound {
                path: backup_path.display().to_string(),
            };
            return Err(self.fail(UpdateStage::Rollback, err.into()));
        }

        let install_dir = self.config.install_dir.clone();
        let files = self
            .recover(&mut registry, backup_path, &install_dir, None)
            .await?;
        Ok(RollbackReport {
            install_dir,
            backup_path: backup_path.to_path_buf(),
            files,
        })
    }

    /// Registered backups, oldest first
    pub async fn get_backups(&self) -> Vec<Backup> {
        self.registry.lock().await.backups().to_vec()
    }

    /// Record that the new version runs; its backup becomes prunable
    ///
    /// # Errors
    ///
    /// Returns an error if another workflow is running or the registry cannot
    /// be saved.
    pub async fn confirm_install(&self) -> Result<Option<Backup>, Error> {
        let Ok(mut registry) = self.registry.try_lock() else {
            return Err(InstallError::InProgress.into());
        };
        let Some(path) = registry.rollback_target().map(|backup| backup.path.clone()) else {
            return Ok(None);
        };

        let confirmed = registry.mark(&path, BackupStatus::Obsolete).cloned();
        registry.prune(self.config.max_backups).await;
        registry.save().await?;

        self.emit_update(UpdateEvent::Confirmed { backup_path: path });
        Ok(confirmed)
    }

    async fn create_backup(
        &self,
        registry: &mut BackupRegistry,
        requested: Option<PathBuf>,
    ) -> Result<Backup, Error> {
        let version = self.config.current_version.clone();
        let path = requested.unwrap_or_else(|| {
            self.config.backup_dir.join(format!(
                "{version}-{}",
                Utc::now().format("%Y%m%dT%H%M%S%.6f")
            ))
        });
        if tokio::fs::try_exists(&path).await.unwrap_or(true) {
            return Err(InstallError::BackupFailed {
                message: format!("{} already exists", path.display()),
            }
            .into());
        }

        let source = self.config.install_dir.clone();
        let target = path.clone();
        let copied = blocking(move || {
            if source.exists() {
                copy_tree(&source, &target)
            } else {
                // Fresh installation: an empty backup restores to nothing
                std::fs::create_dir_all(&target)
                    .map(|()| 0)
                    .map_err(|e| Error::io_with_path(&e, &target))
            }
        })
        .await;
        let files = match copied {
            Ok(files) => files,
            Err(e) => {
                let cleanup = path.clone();
                let _ = blocking(move || {
                    discard(&cleanup);
                    Ok(())
                })
                .await;
                return Err(InstallError::BackupFailed {
                    message: e.to_string(),
                }
                .into());
            }
        };

        let backup = Backup {
            id: Uuid::new_v4(),
            source_version: version,
            path: path.clone(),
            created_at: Utc::now(),
            status: BackupStatus::RollbackTarget,
        };
        registry.register(backup.clone());
        if let Err(e) = registry.save().await {
            registry.forget(&path);
            let _ = blocking(move || {
                discard(&path);
                Ok(())
            })
            .await;
            return Err(InstallError::BackupFailed {
                message: format!("registry not persisted: {e}"),
            }
            .into());
        }

        info!(path = %backup.path.display(), files, version = %backup.source_version, "backup created");
        Ok(backup)
    }

    /// Stage the new tree beside the installation and swap it in
    async fn apply(&self, artifact: &Path, install_dir: &Path) -> Result<usize, Error> {
        let staging = sibling_path(install_dir, "staging");
        let result = self.stage_and_swap(artifact, install_dir, &staging).await;
        if result.is_err() {
            let leftover = staging.clone();
            let _ = blocking(move || {
                discard(&leftover);
                Ok(())
            })
            .await;
        }
        result
    }

    async fn stage_and_swap(
        &self,
        artifact: &Path,
        install_dir: &Path,
        staging: &Path,
    ) -> Result<usize, Error> {
        if ArchiveFormat::from_path(artifact).is_some() {
            let ctx = ExtractContext::new().with_events(self.events.clone());
            fetchup_extract::extract(artifact, staging, &ctx).await?;
        } else {
            let name = artifact
                .file_name()
                .map(PathBuf::from)
                .ok_or_else(|| InstallError::Failed {
                    message: format!("artifact has no file name: {}", artifact.display()),
                })?;
            let (live, stage, file) = (
                install_dir.to_path_buf(),
                staging.to_path_buf(),
                artifact.to_path_buf(),
            );
            blocking(move || {
                if live.exists() {
                    copy_tree(&live, &stage)?;
                } else {
                    std::fs::create_dir_all(&stage).map_err(|e| Error::io_with_path(&e, &stage))?;
                }
                let dest = stage.join(&name);
                std::fs::copy(&file, &dest).map_err(|e| Error::io_with_path(&e, &dest))?;
                std::fs::File::open(&dest)
                    .and_then(|f| f.sync_all())
                    .map_err(|e| Error::io_with_path(&e, &dest))
            })
            .await?;
        }

        let expected = fetchup_hash::digest_tree(staging).await?;
        let (stage, live) = (staging.to_path_buf(), install_dir.to_path_buf());
        blocking(move || swap_in(&stage, &live)).await?;

        verify_tree(install_dir, &expected).await
    }

    /// Copy a backup over the installation; used by manual and automatic
    /// rollback alike
    async fn recover(
        &self,
        registry: &mut BackupRegistry,
        backup_path: &Path,
        install_dir: &Path,
        cause: Option<&Error>,
    ) -> Result<usize, Error> {
        self.emit_update(UpdateEvent::RollbackStarted {
            backup_path: backup_path.to_path_buf(),
        });
        if let Some(cause) = cause {
            debug!(cause = %cause, "automatic rollback");
        }

        match restore(backup_path, install_dir).await {
            Ok(files) => {
                if registry.mark(backup_path, BackupStatus::Restored).is_some() {
                    if let Err(e) = registry.save().await {
                        warn!(error = %e, "failed to persist backup registry after rollback");
                    }
                }
                info!(backup = %backup_path.display(), files, "installation restored");
                self.emit_update(UpdateEvent::RolledBack {
                    backup_path: backup_path.to_path_buf(),
                });
                Ok(files)
            }
            Err(e) => {
                let err = InstallError::RollbackFailed {
                    backup_path: backup_path.display().to_string(),
                    message: e.to_string(),
                };
                error!(backup = %backup_path.display(), error = %e, "rollback failed; restore manually from the backup");
                self.emit_update(UpdateEvent::RollbackFailed {
                    backup_path: backup_path.to_path_buf(),
                    failure: FailureContext::from_error(&Error::from(err.clone())),
                });
                Err(err.into())
            }
        }
    }

    /// Publish a failure for `stage` and hand the error back
    fn fail(&self, stage: UpdateStage, error: Error) -> Error {
        warn!(?stage, error = %error, "update step failed");
        self.emit_update(UpdateEvent::Failed {
            stage,
            failure: FailureContext::from_error(&error),
        });
        error
    }
}

async fn restore(backup_path: &Path, install_dir: &Path) -> Result<usize, Error> {
    let staging = sibling_path(install_dir, "restore");
    let (backup, stage) = (backup_path.to_path_buf(), staging.clone());
    let copied = blocking(move || copy_tree(&backup, &stage)).await;
    if let Err(e) = copied {
        let _ = blocking(move || {
            discard(&staging);
            Ok(())
        })
        .await;
        return Err(e);
    }

    let expected = fetchup_hash::digest_tree(backup_path).await?;
    let (stage, live) = (staging.clone(), install_dir.to_path_buf());
    if let Err(e) = blocking(move || swap_in(&stage, &live)).await {
        let _ = blocking(move || {
            discard(&staging);
            Ok(())
        })
        .await;
        return Err(e);
    }

    verify_tree(install_dir, &expected).await
}

/// Check the live tree against the staged digest; returns its file count
async fn verify_tree(install_dir: &Path, expected: &fetchup_hash::Hash) -> Result<usize, Error> {
    let actual = fetchup_hash::digest_tree(install_dir).await?;
    if actual != *expected {
        return Err(InstallError::VerificationFailed {
            message: format!("{} does not match the staged tree", install_dir.display()),
        }
        .into());
    }
    let live = install_dir.to_path_buf();
    blocking(move || count_files(&live)).await
}

/// Canonical form of a package path, so lookups survive `./` and links
async fn verified_key(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Re-emit the package download's progress under the update domain until
/// the task ends
async fn mirror_progress(
    mut subscription: Subscription,
    events: EventBus,
    id: DownloadId,
    version: Version,
) {
    while let Some(message) = subscription.recv().await {
        let AppEvent::Download(event) = &message.event else {
            continue;
        };
        if event.id() != &id {
            continue;
        }
        if let DownloadEvent::Progress {
            bytes_received,
            total_bytes,
            ..
        } = event
        {
            events.emit_update(UpdateEvent::DownloadProgress {
                version: version.clone(),
                id: id.clone(),
                bytes_received: *bytes_received,
                total_bytes: *total_bytes,
            });
        }
        if event.is_terminal() {
            break;
        }
    }
    events.unsubscribe(subscription.id());
}

async fn blocking<T, F>(work: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, Error> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::internal(format!("blocking task failed: {e}")))?
}
