//! Integration tests for update crate

#[cfg(test)]
mod tests {
    use fetchup_config::RetryConfig;
    use fetchup_download::{DownloadManager, ManagerConfig};
    use fetchup_errors::{ErrorKind, InstallError};
    use fetchup_events::{AppEvent, EventBus, Subscription, UpdateEvent, UpdateStage};
    use fetchup_hash::{digest_tree, Hash, HashAlgorithm};
    use fetchup_net::{HttpTransport, NetClient, TransferConfig};
    use fetchup_types::{BackupStatus, UpdateCheck, UpdatePackage, Version};
    use fetchup_update::*;
    use httpmock::prelude::*;
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _temp: TempDir,
        root: PathBuf,
        installer: UpdateInstaller,
        events: Subscription,
    }

    impl Fixture {
        fn install_dir(&self) -> PathBuf {
            self.root.join("app")
        }
    }

    async fn fixture(source: Option<Arc<dyn VersionSource>>, max_backups: usize) -> Fixture {
        let temp = tempdir().unwrap();
        let root = temp.path().to_path_buf();

        let app = root.join("app");
        std::fs::create_dir_all(app.join("lib")).unwrap();
        std::fs::write(app.join("app.bin"), b"version one").unwrap();
        std::fs::write(app.join("lib/core.dat"), [1u8; 64]).unwrap();

        let bus = EventBus::new();
        let events = bus.subscribe();
        let transport = HttpTransport::new(
            NetClient::with_defaults().unwrap(),
            TransferConfig {
                idle_timeout: Duration::from_secs(5),
                progress_interval: Duration::from_millis(0),
                buffer_size: 256,
            },
        );
        let manager_config = ManagerConfig {
            max_concurrent: 2,
            retain_finished: 10,
            checkpoint_interval: Duration::from_secs(1),
            retry: RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
            default_directory: root.join("downloads"),
            checkpoint_path: None,
        };
        let downloads = DownloadManager::start(manager_config, Arc::new(transport), bus)
            .await
            .unwrap();

        let config = InstallerConfig {
            install_dir: app,
            backup_dir: root.join("backups"),
            update_dir: root.join("updates"),
            current_version: Version::new(1, 0, 0),
            max_backups,
        };
        let installer = UpdateInstaller::new(config, downloads, source).await.unwrap();

        Fixture {
            _temp: temp,
            root,
            installer,
            events,
        }
    }

    fn zip_artifact(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, data) in entries {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    fn sha256_of(path: &Path) -> String {
        let data = std::fs::read(path).unwrap();
        format!("sha256:{}", Hash::from_data(HashAlgorithm::Sha256, &data).to_hex())
    }

    fn update_events(sub: &mut Subscription) -> Vec<UpdateEvent> {
        let mut events = Vec::new();
        while let Some(msg) = sub.try_recv() {
            if let AppEvent::Update(event) = msg.event {
                events.push(event);
            }
        }
        events
    }

    fn package(url: String, checksum: &str) -> UpdatePackage {
        UpdatePackage {
            version: Version::new(2, 0, 0),
            download_url: url,
            checksum: checksum.to_string(),
            local_path: None,
        }
    }

    #[tokio::test]
    async fn check_reads_http_manifest() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/latest.json");
            then.status(200).json_body(serde_json::json!({
                "version": "2.0.0",
                "downloadUrl": "https://example.com/app-2.0.0.zip",
                "checksum": "abc123"
            }));
        });
        let source = HttpVersionSource::new(NetClient::with_defaults().unwrap(), server.url("/latest.json"));
        let mut fx = fixture(Some(Arc::new(source)), 3).await;

        match fx.installer.check_for_updates().await.unwrap() {
            UpdateCheck::Available { package } => {
                assert_eq!(package.version, Version::new(2, 0, 0));
                assert_eq!(package.checksum, "abc123");
            }
            other => panic!("expected an update, got {other:?}"),
        }
        assert!(update_events(&mut fx.events)
            .iter()
            .any(|e| matches!(e, UpdateEvent::Available { .. })));
    }

    #[tokio::test]
    async fn check_reports_up_to_date() {
        let source = StaticVersionSource::new(UpdatePackage {
            version: Version::new(1, 0, 0),
            ..package("https://example.com/app.zip".into(), "abc123")
        });
        let fx = fixture(Some(Arc::new(source)), 3).await;

        assert_eq!(
            fx.installer.check_for_updates().await.unwrap(),
            UpdateCheck::UpToDate {
                current: Version::new(1, 0, 0)
            }
        );
    }

    #[tokio::test]
    async fn check_without_source_is_a_config_error() {
        let fx = fixture(None, 3).await;
        let err = fx.installer.check_for_updates().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn download_update_verifies_and_mirrors_progress() {
        let server = MockServer::start();
        let data = vec![42u8; 4096];
        server.mock(|when, then| {
            when.method(GET).path("/app-2.0.0.bin");
            then.status(200).body(&data);
        });
        let checksum = format!(
            "sha256:{}",
            Hash::from_data(HashAlgorithm::Sha256, &data).to_hex()
        );
        let mut fx = fixture(None, 3).await;

        let downloaded = fx
            .installer
            .download_update(&package(server.url("/app-2.0.0.bin"), &checksum))
            .await
            .unwrap();

        let path = downloaded.local_path.unwrap();
        assert_eq!(path, fx.root.join("updates/app-2.0.0.bin"));
        assert_eq!(std::fs::read(&path).unwrap(), data);

        let events = update_events(&mut fx.events);
        let mirrored = events
            .iter()
            .filter_map(|e| match e {
                UpdateEvent::DownloadProgress { bytes_received, .. } => Some(*bytes_received),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(mirrored.last(), Some(&4096));
        assert!(matches!(events.last(), Some(UpdateEvent::Verified { .. })));
    }

    #[tokio::test]
    async fn checksum_mismatch_discards_package_and_creates_no_backup() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/app-2.0.0.zip");
            then.status(200).body("definitely not xyz999");
        });
        let mut fx = fixture(None, 3).await;
        let before = digest_tree(&fx.install_dir()).await.unwrap();

        let err = fx
            .installer
            .download_update(&package(server.url("/app-2.0.0.zip"), "abc123"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert!(!fx.root.join("updates/app-2.0.0.zip").exists());
        assert!(fx.installer.get_backups().await.is_empty());
        assert!(!fx.root.join("backups").exists());
        assert_eq!(digest_tree(&fx.install_dir()).await.unwrap(), before);

        let events = update_events(&mut fx.events);
        assert!(events.iter().any(|e| matches!(
            e,
            UpdateEvent::Failed { stage: UpdateStage::Verify, failure }
                if failure.kind == ErrorKind::ChecksumMismatch
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, UpdateEvent::BackupCreated { .. } | UpdateEvent::Installing { .. })));
    }

    #[tokio::test]
    async fn tampered_package_is_not_installed() {
        let server = MockServer::start();
        let artifact = tempdir().unwrap();
        let source = artifact.path().join("app-2.0.0.zip");
        zip_artifact(&source, &[("app.bin", b"version two")]);
        let data = std::fs::read(&source).unwrap();
        let checksum = sha256_of(&source);
        server.mock(|when, then| {
            when.method(GET).path("/app-2.0.0.zip");
            then.status(200).body(&data);
        });
        let mut fx = fixture(None, 3).await;
        let before = digest_tree(&fx.install_dir()).await.unwrap();

        let downloaded = fx
            .installer
            .download_update(&package(server.url("/app-2.0.0.zip"), &checksum))
            .await
            .unwrap();
        let path = downloaded.local_path.unwrap();
        zip_artifact(&path, &[("app.bin", b"TAMPERED")]);
        update_events(&mut fx.events);

        let err = fx.installer.install_update(&path, None, None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
        assert_eq!(digest_tree(&fx.install_dir()).await.unwrap(), before);
        assert!(fx.installer.get_backups().await.is_empty());
        assert!(!fx.root.join("backups").exists());

        let events = update_events(&mut fx.events);
        assert!(events.iter().any(|e| matches!(
            e,
            UpdateEvent::Failed { stage: UpdateStage::Verify, failure }
                if failure.kind == ErrorKind::ChecksumMismatch
        )));
        assert!(!events
            .iter()
            .any(|e| matches!(e, UpdateEvent::BackupCreated { .. } | UpdateEvent::Installing { .. })));
    }

    #[tokio::test]
    async fn downloaded_package_installs_without_explicit_checksum() {
        let server = MockServer::start();
        let artifact = tempdir().unwrap();
        let source = artifact.path().join("app-2.0.0.zip");
        zip_artifact(&source, &[("app.bin", b"version two")]);
        let data = std::fs::read(&source).unwrap();
        let checksum = sha256_of(&source);
        server.mock(|when, then| {
            when.method(GET).path("/app-2.0.0.zip");
            then.status(200).body(&data);
        });
        let fx = fixture(None, 3).await;

        let downloaded = fx
            .installer
            .download_update(&package(server.url("/app-2.0.0.zip"), &checksum))
            .await
            .unwrap();
        fx.installer
            .install_update(&downloaded.local_path.unwrap(), None, None)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read(fx.install_dir().join("app.bin")).unwrap(),
            b"version two"
        );
    }

    #[tokio::test]
    async fn artifact_without_checksum_is_refused() {
        let fx = fixture(None, 3).await;
        let artifact = fx.root.join("app-2.0.0.zip");
        zip_artifact(&artifact, &[("app.bin", b"version two")]);

        let err = fx
            .installer
            .install_update(&artifact, None, None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            fetchup_errors::Error::Install(InstallError::Unverified { .. })
        ));
        assert_eq!(
            std::fs::read(fx.install_dir().join("app.bin")).unwrap(),
            b"version one"
        );
        assert!(fx.installer.get_backups().await.is_empty());
    }

    #[tokio::test]
    async fn install_then_rollback_restores_original_tree() {
        let fx = fixture(None, 3).await;
        let before = digest_tree(&fx.install_dir()).await.unwrap();
        let artifact = fx.root.join("app-2.0.0.zip");
        zip_artifact(
            &artifact,
            &[("app.bin", b"version two"), ("share/notes.txt", b"new")],
        );

        let checksum = sha256_of(&artifact);
        let report = fx
            .installer
            .install_update(&artifact, None, Some(&checksum))
            .await
            .unwrap();

        assert_eq!(report.files, 2);
        assert_eq!(
            std::fs::read(fx.install_dir().join("app.bin")).unwrap(),
            b"version two"
        );
        assert!(!fx.install_dir().join("lib").exists());
        assert_eq!(report.backup.status, BackupStatus::RollbackTarget);
        assert_eq!(report.backup.source_version, Version::new(1, 0, 0));
        assert_eq!(digest_tree(&report.backup.path).await.unwrap(), before);
        assert_eq!(fx.installer.get_backups().await.len(), 1);

        let rollback = fx
            .installer
            .rollback_update(&report.backup.path)
            .await
            .unwrap();

        assert_eq!(rollback.files, 2);
        assert_eq!(digest_tree(&fx.install_dir()).await.unwrap(), before);
        assert!(report.backup.path.exists());
        assert_eq!(
            fx.installer.get_backups().await[0].status,
            BackupStatus::Restored
        );

        // No staging or retired trees are left beside the installation
        let siblings: Vec<_> = std::fs::read_dir(&fx.root)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".app."))
            .collect();
        assert!(siblings.is_empty());
    }

    #[tokio::test]
    async fn failed_install_rolls_back_automatically() {
        let mut fx = fixture(None, 3).await;
        let before = digest_tree(&fx.install_dir()).await.unwrap();
        let artifact = fx.root.join("evil-2.0.0.zip");
        zip_artifact(&artifact, &[("ok.txt", b"ok"), ("../outside.txt", b"bad")]);
        let checksum = sha256_of(&artifact);

        let err = fx
            .installer
            .install_update(&artifact, None, Some(&checksum))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            fetchup_errors::Error::Install(InstallError::RolledBack { .. })
        ));
        assert_eq!(digest_tree(&fx.install_dir()).await.unwrap(), before);
        assert!(!fx.root.join("outside.txt").exists());

        let backups = fx.installer.get_backups().await;
        assert_eq!(backups.len(), 1);
        assert!(backups[0].path.exists());

        let events = update_events(&mut fx.events);
        let backup_at = events
            .iter()
            .position(|e| matches!(e, UpdateEvent::BackupCreated { .. }))
            .unwrap();
        let rolled_back_at = events
            .iter()
            .position(|e| matches!(e, UpdateEvent::RolledBack { .. }))
            .unwrap();
        assert!(backup_at < rolled_back_at);
    }

    #[tokio::test]
    async fn plain_artifact_replaces_matching_file() {
        let fx = fixture(None, 3).await;
        let artifact = fx.root.join("app.bin");
        std::fs::write(&artifact, b"patched binary").unwrap();
        let backup_path = fx.root.join("my-backup");
        let checksum = sha256_of(&artifact);

        let report = fx
            .installer
            .install_update(&artifact, Some(backup_path.clone()), Some(&checksum))
            .await
            .unwrap();

        assert_eq!(report.backup.path, backup_path);
        assert_eq!(report.files, 2);
        assert_eq!(
            std::fs::read(fx.install_dir().join("app.bin")).unwrap(),
            b"patched binary"
        );
        assert_eq!(
            std::fs::read(fx.install_dir().join("lib/core.dat")).unwrap(),
            [1u8; 64]
        );
        assert_eq!(
            std::fs::read(backup_path.join("app.bin")).unwrap(),
            b"version one"
        );
    }

    #[tokio::test]
    async fn confirm_marks_backup_obsolete_and_prunes() {
        let fx = fixture(None, 1).await;
        let artifact = fx.root.join("app.bin");

        std::fs::write(&artifact, b"v2").unwrap();
        let first = fx
            .installer
            .install_update(&artifact, None, Some(&sha256_of(&artifact)))
            .await
            .unwrap();
        let confirmed = fx.installer.confirm_install().await.unwrap().unwrap();
        assert_eq!(confirmed.path, first.backup.path);
        assert_eq!(confirmed.status, BackupStatus::Obsolete);

        std::fs::write(&artifact, b"v3").unwrap();
        let second = fx
            .installer
            .install_update(&artifact, None, Some(&sha256_of(&artifact)))
            .await
            .unwrap();

        let backups = fx.installer.get_backups().await;
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].path, second.backup.path);
        assert_eq!(backups[0].status, BackupStatus::RollbackTarget);
        assert!(!first.backup.path.exists());

        let manifest = std::fs::read_to_string(fx.root.join("backups/backups.json")).unwrap();
        assert!(manifest.contains("rollback_target"));
    }

    #[tokio::test]
    async fn rollback_requires_existing_backup() {
        let fx = fixture(None, 3).await;
        let err = fx
            .installer
            .rollback_update(&fx.root.join("no-such-backup"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn missing_artifact_touches_nothing() {
        let fx = fixture(None, 3).await;
        let err = fx
            .installer
            .install_update(&fx.root.join("missing.zip"), None, Some("sha256:00"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(fx.installer.get_backups().await.is_empty());
    }
}
