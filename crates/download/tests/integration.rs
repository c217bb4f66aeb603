//! Integration tests for download crate

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use fetchup_config::RetryConfig;
    use fetchup_download::{DownloadManager, ManagerConfig};
    use fetchup_errors::{Error, ErrorKind, NetworkError, UserFacingError};
    use fetchup_events::{AppEvent, DownloadEvent, EventBus, Subscription};
    use fetchup_net::{TransferError, TransferOutcome, TransferProgress, TransferRequest, Transport};
    use fetchup_types::{CommandOutcome, DownloadId, DownloadRequest, DownloadState};
    use std::collections::VecDeque;
    use std::io::Write;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::io::{AsyncSeekExt, AsyncWriteExt};
    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
    use tokio_util::sync::CancellationToken;

    const CHUNK: usize = 100;

    /// In-memory transport serving one body, with scripted stalls and failures
    struct ScriptedTransport {
        body: Vec<u8>,
        /// Stop after this many bytes and wait for cancellation
        hold_at: Mutex<Option<u64>>,
        /// Keep `hold_at` for every attempt instead of only the first
        hold_every_attempt: bool,
        failures: Mutex<VecDeque<Error>>,
        offsets: Mutex<Vec<u64>>,
        held: UnboundedSender<DownloadId>,
    }

    impl ScriptedTransport {
        fn new(body: Vec<u8>) -> (Self, UnboundedReceiver<DownloadId>) {
            let (held, held_rx) = mpsc::unbounded_channel();
            let transport = Self {
                body,
                hold_at: Mutex::new(None),
                hold_every_attempt: false,
                failures: Mutex::new(VecDeque::new()),
                offsets: Mutex::new(Vec::new()),
                held,
            };
            (transport, held_rx)
        }

        fn hold_at(self, bytes: u64) -> Self {
            *self.hold_at.lock().unwrap() = Some(bytes);
            self
        }

        fn hold_always(mut self, bytes: u64) -> Self {
            self.hold_every_attempt = true;
            self.hold_at(bytes)
        }

        fn fail_with(self, errors: Vec<Error>) -> Self {
            self.failures.lock().unwrap().extend(errors);
            self
        }

        fn offsets(&self) -> Vec<u64> {
            self.offsets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn transfer(
            &self,
            request: TransferRequest,
            progress: UnboundedSender<TransferProgress>,
            cancel: CancellationToken,
        ) -> Result<TransferOutcome, TransferError> {
            let offset = request.resume_offset;
            self.offsets.lock().unwrap().push(offset);

            if let Some(error) = self.failures.lock().unwrap().pop_front() {
                return Err(TransferError {
                    task_id: request.task_id,
                    error,
                    bytes_persisted: offset,
                });
            }

            let hold = if self.hold_every_attempt {
                *self.hold_at.lock().unwrap()
            } else {
                self.hold_at.lock().unwrap().take()
            };

            let total = self.body.len() as u64;
            let stop_at = hold.unwrap_or(total).min(total);

            tokio::fs::create_dir_all(request.destination.parent().unwrap())
                .await
                .unwrap();
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&request.destination)
                .await
                .unwrap();
            file.set_len(offset).await.unwrap();
            file.seek(std::io::SeekFrom::End(0)).await.unwrap();

            let mut written = offset;
            let _ = progress.send(TransferProgress {
                bytes_received: written,
                total_bytes: Some(total),
            });
            while written < stop_at {
                let end = (written as usize + CHUNK).min(stop_at as usize);
                file.write_all(&self.body[written as usize..end]).await.unwrap();
                written = end as u64;
                let _ = progress.send(TransferProgress {
                    bytes_received: written,
                    total_bytes: Some(total),
                });
            }
            file.flush().await.unwrap();

            if hold.is_some_and(|hold| hold < total) {
                let _ = self.held.send(request.task_id.clone());
                cancel.cancelled().await;
                return Ok(TransferOutcome::Interrupted {
                    bytes_received: written,
                });
            }

            Ok(TransferOutcome::Complete {
                bytes_received: written,
                total_bytes: Some(total),
            })
        }
    }

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    fn manager_config(dir: &TempDir) -> ManagerConfig {
        ManagerConfig {
            max_concurrent: 3,
            retain_finished: 100,
            checkpoint_interval: Duration::from_millis(50),
            retry: fast_retry(),
            default_directory: dir.path().join("downloads"),
            checkpoint_path: None,
        }
    }

    async fn start(
        config: ManagerConfig,
        transport: ScriptedTransport,
    ) -> (DownloadManager, Arc<ScriptedTransport>, Subscription) {
        let transport = Arc::new(transport);
        let events = EventBus::new();
        let sub = events.subscribe();
        let manager = DownloadManager::start(config, transport.clone(), events)
            .await
            .unwrap();
        (manager, transport, sub)
    }

    fn request(id: &str, dest: &Path) -> DownloadRequest {
        DownloadRequest::new("https://example.com/files/data.bin")
            .with_id(id)
            .with_destination(dest)
    }

    fn download_events(sub: &mut Subscription, id: &str) -> Vec<DownloadEvent> {
        let mut events = Vec::new();
        while let Some(msg) = sub.try_recv() {
            if let AppEvent::Download(event) = msg.event {
                if event.id().as_str() == id {
                    events.push(event);
                }
            }
        }
        events
    }

    async fn next_held(held: &mut UnboundedReceiver<DownloadId>) -> DownloadId {
        tokio::time::timeout(Duration::from_secs(5), held.recv())
            .await
            .expect("transfer never reached its hold point")
            .unwrap()
    }

    #[tokio::test]
    async fn pause_and_resume_continue_from_persisted_bytes() {
        let dir = tempdir().unwrap();
        let data = body(1000);
        let (transport, mut held) = ScriptedTransport::new(data.clone());
        let (manager, transport, mut sub) =
            start(manager_config(&dir), transport.hold_at(400)).await;
        let id = DownloadId::new("d1");

        let task = manager
            .start_download(request("d1", dir.path()))
            .await
            .unwrap();
        assert_eq!(task.file_name, "data.bin");
        assert_eq!(next_held(&mut held).await, id);

        assert_eq!(manager.pause(&id).await.unwrap(), CommandOutcome::Applied);
        assert_eq!(manager.resume(&id).await.unwrap(), CommandOutcome::Applied);

        let done = manager.wait(&id).await.unwrap();
        assert_eq!(done.state, DownloadState::Completed);
        assert_eq!(done.bytes_received, 1000);
        assert_eq!(done.total_bytes, Some(1000));
        assert_eq!(transport.offsets(), vec![0, 400]);
        assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), data);

        let events = download_events(&mut sub, "d1");
        assert!(matches!(events.first(), Some(DownloadEvent::Queued { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, DownloadEvent::Paused { bytes_received: 400, .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, DownloadEvent::Started { resume_offset: 400, .. })));
        assert!(matches!(
            events.last(),
            Some(DownloadEvent::Completed { bytes_received: 1000, .. })
        ));

        let progress: Vec<u64> = events
            .iter()
            .filter_map(|e| match e {
                DownloadEvent::Progress { bytes_received, .. } => Some(*bytes_received),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(progress.last(), Some(&1000));
    }

    #[tokio::test]
    async fn cancel_removes_partial_file() {
        let dir = tempdir().unwrap();
        let (transport, mut held) = ScriptedTransport::new(body(1000));
        let (manager, _transport, mut sub) =
            start(manager_config(&dir), transport.hold_at(400)).await;
        let id = DownloadId::new("d2");

        manager
            .start_download(request("d2", dir.path()))
            .await
            .unwrap();
        next_held(&mut held).await;
        assert!(dir.path().join("data.bin").exists());

        assert_eq!(manager.cancel(&id).await.unwrap(), CommandOutcome::Applied);
        let task = manager.wait(&id).await.unwrap();

        assert_eq!(task.state, DownloadState::Cancelled);
        assert!(!dir.path().join("data.bin").exists());
        let events = download_events(&mut sub, "d2");
        assert!(matches!(events.last(), Some(DownloadEvent::Cancelled { .. })));
    }

    #[tokio::test]
    async fn commands_are_idempotent() {
        let dir = tempdir().unwrap();
        let (transport, mut held) = ScriptedTransport::new(body(500));
        let (manager, _transport, _sub) =
            start(manager_config(&dir), transport.hold_at(200)).await;
        let id = DownloadId::new("d3");

        manager
            .start_download(request("d3", dir.path()))
            .await
            .unwrap();
        next_held(&mut held).await;

        assert_eq!(manager.pause(&id).await.unwrap(), CommandOutcome::Applied);
        assert_eq!(
            manager.pause(&id).await.unwrap(),
            CommandOutcome::NoOp {
                state: DownloadState::Paused
            }
        );

        let err = manager
            .start_download(request("d3", dir.path()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);

        manager.resume(&id).await.unwrap();
        manager.wait(&id).await.unwrap();
        assert_eq!(
            manager.cancel(&id).await.unwrap(),
            CommandOutcome::NoOp {
                state: DownloadState::Completed
            }
        );
        assert_eq!(
            manager.pause(&DownloadId::new("nope")).await.unwrap(),
            CommandOutcome::NotFound
        );

        assert_eq!(manager.remove(&id).await.unwrap(), CommandOutcome::Applied);
        assert!(manager.get(&id).await.unwrap().is_none());
        // The file stays on disk
        assert!(dir.path().join("data.bin").exists());
    }

    #[tokio::test]
    async fn concurrency_cap_queues_extra_tasks() {
        let dir = tempdir().unwrap();
        let (transport, mut held) = ScriptedTransport::new(body(1000));
        let config = manager_config(&dir).with_max_concurrent(2);
        let (manager, _transport, _sub) = start(config, transport.hold_always(100)).await;

        for id in ["a", "b", "c"] {
            manager
                .start_download(
                    DownloadRequest::new(format!("https://example.com/{id}.bin"))
                        .with_id(id)
                        .with_destination(dir.path()),
                )
                .await
                .unwrap();
        }
        let first = next_held(&mut held).await;
        let second = next_held(&mut held).await;
        assert_ne!(first, second);

        let tasks = manager.list().await.unwrap();
        let state = |id: &str| tasks.iter().find(|t| t.id.as_str() == id).unwrap().state;
        assert_eq!(state("a"), DownloadState::Downloading);
        assert_eq!(state("b"), DownloadState::Downloading);
        assert_eq!(state("c"), DownloadState::Pending);

        manager.cancel(&DownloadId::new("a")).await.unwrap();
        assert_eq!(next_held(&mut held).await.as_str(), "c");
        assert_eq!(
            manager.get(&DownloadId::new("c")).await.unwrap().unwrap().state,
            DownloadState::Downloading
        );

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let dir = tempdir().unwrap();
        let (transport, _held) = ScriptedTransport::new(body(300));
        let transport = transport.fail_with(vec![
            NetworkError::HttpError {
                status: 503,
                message: "unavailable".into(),
            }
            .into(),
            NetworkError::ConnectionRefused("example.com".into()).into(),
        ]);
        let (manager, transport, mut sub) = start(manager_config(&dir), transport).await;
        let id = DownloadId::new("r1");

        manager
            .start_download(request("r1", dir.path()))
            .await
            .unwrap();
        let task = manager.wait(&id).await.unwrap();

        assert_eq!(task.state, DownloadState::Completed);
        assert_eq!(transport.offsets().len(), 3);
        let retries = download_events(&mut sub, "r1")
            .into_iter()
            .filter(|e| matches!(e, DownloadEvent::Retrying { .. }))
            .count();
        assert_eq!(retries, 2);
    }

    #[tokio::test]
    async fn client_errors_fail_without_retry() {
        let dir = tempdir().unwrap();
        let (transport, _held) = ScriptedTransport::new(body(300));
        let transport = transport.fail_with(vec![NetworkError::HttpError {
            status: 404,
            message: "not found".into(),
        }
        .into()]);
        let (manager, transport, mut sub) = start(manager_config(&dir), transport).await;
        let id = DownloadId::new("f1");

        manager
            .start_download(request("f1", dir.path()))
            .await
            .unwrap();
        let task = manager.wait(&id).await.unwrap();

        assert_eq!(task.state, DownloadState::Failed);
        assert!(task.last_error.is_some());
        assert_eq!(transport.offsets(), vec![0]);
        match download_events(&mut sub, "f1").last() {
            Some(DownloadEvent::Failed { failure, .. }) => {
                assert_eq!(failure.kind, ErrorKind::PermanentTransfer);
                assert!(!failure.retryable);
            }
            other => panic!("expected a failure event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let dir = tempdir().unwrap();
        let (transport, _held) = ScriptedTransport::new(body(10));
        let (manager, _transport, _sub) = start(manager_config(&dir), transport).await;

        let err = manager
            .start_download(DownloadRequest::new("ftp://example.com/file"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());

        let err = manager
            .start_download(
                DownloadRequest::new("https://example.com/file").with_file_name("../escape"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert!(manager.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn auto_extract_unpacks_next_to_archive() {
        let dir = tempdir().unwrap();
        let mut archive = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut archive));
            zip.start_file("readme.txt", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"hello").unwrap();
            zip.finish().unwrap();
        }
        let (transport, _held) = ScriptedTransport::new(archive);
        let (manager, _transport, mut sub) = start(manager_config(&dir), transport).await;
        let id = DownloadId::new("z1");

        manager
            .start_download(
                DownloadRequest::new("https://example.com/bundle.zip")
                    .with_id("z1")
                    .with_destination(dir.path())
                    .auto_extract(true),
            )
            .await
            .unwrap();
        let task = manager.wait(&id).await.unwrap();

        assert_eq!(task.state, DownloadState::Extracted);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("bundle/readme.txt")).unwrap(),
            "hello"
        );
        assert!(!dir.path().join("bundle.zip").exists());

        let mut names = Vec::new();
        while let Some(msg) = sub.try_recv() {
            names.push(msg.event.event_name());
        }
        assert!(names.contains(&"extraction-complete"));
        assert!(!names.contains(&"download-complete"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn extraction_events_follow_every_download_event() {
        let dir = tempdir().unwrap();
        let mut archive = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut archive));
            for name in ["a.txt", "b.txt", "c.txt"] {
                zip.start_file(name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(&body(700)).unwrap();
            }
            zip.finish().unwrap();
        }
        let (transport, _held) = ScriptedTransport::new(archive);
        let mut config = manager_config(&dir);
        config.max_concurrent = 8;
        let (manager, _transport, mut sub) = start(config, transport).await;

        let ids: Vec<DownloadId> = (0..40).map(|i| DownloadId::new(format!("x{i}"))).collect();
        for (i, id) in ids.iter().enumerate() {
            manager
                .start_download(
                    DownloadRequest::new(format!("https://example.com/bundle-{i}.zip"))
                        .with_id(id.clone())
                        .with_destination(dir.path())
                        .auto_extract(true),
                )
                .await
                .unwrap();
        }
        for id in &ids {
            assert_eq!(manager.wait(id).await.unwrap().state, DownloadState::Extracted);
        }

        // (task, is extraction event, event name) in delivery order
        let mut delivered = Vec::new();
        while let Some(msg) = sub.try_recv() {
            let name = msg.event.event_name();
            match msg.event {
                AppEvent::Download(event) => delivered.push((event.id().clone(), false, name)),
                AppEvent::Extract(event) => {
                    if let Some(id) = event.id() {
                        delivered.push((id.clone(), true, name));
                    }
                }
                _ => {}
            }
        }

        for id in &ids {
            let sequence: Vec<_> = delivered
                .iter()
                .filter(|(task, _, _)| task == id)
                .map(|(_, extraction, name)| (*extraction, *name))
                .collect();
            let first_extraction = sequence.iter().position(|(extraction, _)| *extraction).unwrap();
            assert!(
                sequence[first_extraction..].iter().all(|(extraction, _)| *extraction),
                "download event after extraction started for {id}: {sequence:?}"
            );
            assert_eq!(sequence.last().unwrap().1, "extraction-complete");
        }
    }

    #[tokio::test]
    async fn restart_restores_tasks_as_paused() {
        let dir = tempdir().unwrap();
        let checkpoint = dir.path().join("state/downloads.json");
        let data = body(1000);

        {
            let (transport, mut held) = ScriptedTransport::new(data.clone());
            let config = manager_config(&dir).with_checkpoint_path(&checkpoint);
            let (manager, _transport, _sub) = start(config, transport.hold_at(400)).await;
            manager
                .start_download(request("p1", dir.path()))
                .await
                .unwrap();
            next_held(&mut held).await;
            manager.shutdown().await.unwrap();
            assert!(manager.list().await.is_err());
        }
        assert!(checkpoint.exists());

        let (transport, _held) = ScriptedTransport::new(data.clone());
        let config = manager_config(&dir).with_checkpoint_path(&checkpoint);
        let (manager, transport, _sub) = start(config, transport).await;
        let id = DownloadId::new("p1");

        let task = manager.get(&id).await.unwrap().unwrap();
        assert_eq!(task.state, DownloadState::Paused);
        assert_eq!(task.bytes_received, 400);

        assert_eq!(manager.resume(&id).await.unwrap(), CommandOutcome::Applied);
        let task = manager.wait(&id).await.unwrap();
        assert_eq!(task.state, DownloadState::Completed);
        assert_eq!(transport.offsets(), vec![400]);
        assert_eq!(std::fs::read(dir.path().join("data.bin")).unwrap(), data);
    }
}
