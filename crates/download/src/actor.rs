//! The registry actor
//!
//! One task owns every [`DownloadTask`]; handles talk to it through
//! [`Command`]s and workers report back through [`WorkerMessage`]s, so task
//! state is only ever mutated here and events for a task leave in order.

use crate::checkpoint::CheckpointStore;
use crate::command::{Command, WorkerMessage, WorkerUpdate};
use crate::config::ManagerConfig;
use crate::worker::{self, WorkerJob};
use fetchup_errors::{DownloadError, Error};
use fetchup_events::{DownloadEvent, EventBus, EventEmitter, FailureContext};
use fetchup_net::{validate_url, Transport};
use fetchup_types::{CommandOutcome, DownloadId, DownloadRequest, DownloadState, DownloadTask};
use std::collections::{HashMap, VecDeque};
use std::path::{Component, Path};
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const FALLBACK_FILE_NAME: &str = "download";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Pause,
    Cancel,
    Shutdown,
}

#[derive(Debug)]
struct ActiveWorker {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct Entry {
    task: DownloadTask,
    /// Highest byte count announced in a progress event
    reported: u64,
    worker: Option<ActiveWorker>,
    /// Why the live worker was told to stop
    stop: Option<StopReason>,
    waiters: Vec<oneshot::Sender<Option<DownloadTask>>>,
}

impl Entry {
    fn new(task: DownloadTask) -> Self {
        Self {
            reported: task.bytes_received,
            task,
            worker: None,
            stop: None,
            waiters: Vec::new(),
        }
    }

    fn is_stopping(&self) -> bool {
        self.stop.is_some()
    }
}

pub(crate) struct Actor {
    config: ManagerConfig,
    transport: Arc<dyn Transport>,
    events: EventBus,
    store: Option<CheckpointStore>,
    entries: HashMap<DownloadId, Entry>,
    /// Admission order of `Pending` tasks
    pending: VecDeque<DownloadId>,
    /// Terminal tasks, oldest first, for retention
    finished: VecDeque<DownloadId>,
    next_generation: u64,
    worker_tx: UnboundedSender<WorkerMessage>,
    dirty: bool,
    shutting_down: bool,
}

impl Actor {
    pub fn new(
        config: ManagerConfig,
        transport: Arc<dyn Transport>,
        events: EventBus,
        restored: Vec<DownloadTask>,
        worker_tx: UnboundedSender<WorkerMessage>,
    ) -> Self {
        let store = config.checkpoint_path.clone().map(CheckpointStore::new);
        let entries = restored
            .into_iter()
            .map(|task| (task.id.clone(), Entry::new(task)))
            .collect();

        Self {
            config,
            transport,
            events,
            store,
            entries,
            pending: VecDeque::new(),
            finished: VecDeque::new(),
            next_generation: 0,
            worker_tx,
            dirty: false,
            shutting_down: false,
        }
    }

    pub async fn run(
        mut self,
        mut commands: UnboundedReceiver<Command>,
        mut workers: UnboundedReceiver<WorkerMessage>,
    ) {
        let mut checkpoint_tick = tokio::time::interval(self.config.checkpoint_interval);
        checkpoint_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                Some(message) = workers.recv() => self.on_worker(message).await,

                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown(&mut workers).await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        // Every handle is gone
                        self.shutdown(&mut workers).await;
                        break;
                    }
                },

                _ = checkpoint_tick.tick() => {
                    if self.dirty {
                        self.checkpoint().await;
                    }
                }
            }
        }

        debug!("download manager stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start { request, reply } => {
                let result = self.start(request);
                if result.is_ok() {
                    self.checkpoint().await;
                }
                let _ = reply.send(result);
            }
            Command::Pause { id, reply } => {
                let outcome = self.pause(&id);
                self.after_command(outcome).await;
                let _ = reply.send(outcome);
            }
            Command::Resume { id, reply } => {
                let outcome = self.resume(&id);
                self.after_command(outcome).await;
                let _ = reply.send(outcome);
            }
            Command::Cancel { id, reply } => {
                let outcome = self.cancel(&id).await;
                self.after_command(outcome).await;
                let _ = reply.send(outcome);
            }
            Command::Remove { id, reply } => {
                let _ = reply.send(self.remove(&id));
            }
            Command::Get { id, reply } => {
                let _ = reply.send(self.entries.get(&id).map(|entry| entry.task.clone()));
            }
            Command::List { reply } => {
                let mut tasks: Vec<_> = self.entries.values().map(|entry| entry.task.clone()).collect();
                tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
                let _ = reply.send(tasks);
            }
            Command::Wait { id, reply } => match self.entries.get_mut(&id) {
                Some(entry) if entry.task.state.is_terminal() && entry.worker.is_none() => {
                    let _ = reply.send(Some(entry.task.clone()));
                }
                Some(entry) => entry.waiters.push(reply),
                None => {
                    let _ = reply.send(None);
                }
            },
            // Handled by the run loop
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn after_command(&mut self, outcome: CommandOutcome) {
        if outcome.is_applied() {
            self.checkpoint().await;
        }
    }

    fn start(&mut self, request: DownloadRequest) -> Result<DownloadTask, Error> {
        let url = validate_url(&request.url)?;
        let id = request.id.clone().unwrap_or_else(DownloadId::generate);

        if let Some(existing) = self.entries.get(&id) {
            if !existing.task.state.is_terminal() || existing.worker.is_some() {
                return Err(DownloadError::AlreadyActive { id: id.to_string() }.into());
            }
        }

        let file_name = match request.file_name.as_deref() {
            Some(name) => name.to_string(),
            None => file_name_from_url(&url),
        };
        if !is_plain_file_name(&file_name) {
            return Err(DownloadError::InvalidRequest {
                message: format!("file name must be a single path component: {file_name}"),
            }
            .into());
        }

        let destination = request
            .destination
            .unwrap_or_else(|| self.config.default_directory.clone());
        let mut task = DownloadTask::new(id.clone(), request.url, destination, file_name);
        task.headers = request.headers;
        task.auto_extract = request.auto_extract;

        info!(download_id = %id, url = %task.url, path = %task.file_path().display(), "download queued");
        self.finished.retain(|finished| finished != &id);
        self.pending.push_back(id.clone());
        self.events.emit_download(DownloadEvent::Queued {
            id: id.clone(),
            url: task.url.clone(),
            destination_path: task.file_path(),
            position: self.pending.len(),
        });
        self.entries.insert(id.clone(), Entry::new(task));
        self.dirty = true;

        self.admit();
        self.entries
            .get(&id)
            .map(|entry| entry.task.clone())
            .ok_or_else(|| DownloadError::TaskNotFound { id: id.to_string() }.into())
    }

    fn pause(&mut self, id: &DownloadId) -> CommandOutcome {
        let Some(entry) = self.entries.get_mut(id) else {
            return CommandOutcome::NotFound;
        };

        match entry.task.state {
            DownloadState::Pending => {
                entry.task.transition(DownloadState::Paused);
                self.pending.retain(|queued| queued != id);
            }
            DownloadState::Downloading => {
                entry.task.transition(DownloadState::Paused);
                entry.stop = Some(StopReason::Pause);
                if let Some(worker) = &entry.worker {
                    worker.cancel.cancel();
                }
            }
            state => return CommandOutcome::NoOp { state },
        }

        debug!(download_id = %id, bytes = entry.task.bytes_received, "download paused");
        self.events.emit_download(DownloadEvent::Paused {
            id: id.clone(),
            bytes_received: entry.task.bytes_received,
        });
        self.dirty = true;
        CommandOutcome::Applied
    }

    fn resume(&mut self, id: &DownloadId) -> CommandOutcome {
        let Some(entry) = self.entries.get_mut(id) else {
            return CommandOutcome::NotFound;
        };
        if entry.task.state != DownloadState::Paused {
            return CommandOutcome::NoOp {
                state: entry.task.state,
            };
        }

        entry.task.transition(DownloadState::Pending);
        entry.task.retry_count = 0;
        entry.task.last_error = None;
        self.pending.push_back(id.clone());

        debug!(download_id = %id, bytes = entry.task.bytes_received, "download resumed");
        self.events.emit_download(DownloadEvent::Resumed {
            id: id.clone(),
            bytes_received: entry.task.bytes_received,
        });
        self.dirty = true;

        // A worker still winding down from the pause holds the slot until it exits
        self.admit();
        CommandOutcome::Applied
    }

    async fn cancel(&mut self, id: &DownloadId) -> CommandOutcome {
        let Some(entry) = self.entries.get_mut(id) else {
            return CommandOutcome::NotFound;
        };
        if entry.task.state.is_terminal() {
            return CommandOutcome::NoOp {
                state: entry.task.state,
            };
        }

        entry.task.transition(DownloadState::Cancelled);
        self.pending.retain(|queued| queued != id);
        self.dirty = true;

        if let Some(cancel) = entry.worker.as_ref().map(|worker| worker.cancel.clone()) {
            // Cleanup happens once the worker has let go of the file
            entry.stop = Some(StopReason::Cancel);
            cancel.cancel();
        } else {
            self.finalize_cancel(id).await;
        }
        CommandOutcome::Applied
    }

    fn remove(&mut self, id: &DownloadId) -> CommandOutcome {
        let Some(entry) = self.entries.get(id) else {
            return CommandOutcome::NotFound;
        };
        if !entry.task.state.is_terminal() || entry.worker.is_some() {
            return CommandOutcome::NoOp {
                state: entry.task.state,
            };
        }

        self.entries.remove(id);
        self.finished.retain(|finished| finished != id);
        CommandOutcome::Applied
    }

    async fn finalize_cancel(&mut self, id: &DownloadId) {
        let Some(entry) = self.entries.get(id) else {
            return;
        };
        remove_partial(&entry.task.file_path()).await;

        info!(download_id = %id, "download cancelled");
        self.events
            .emit_download(DownloadEvent::Cancelled { id: id.clone() });
        self.finish(id);
    }

    /// Start queued tasks while slots are free
    fn admit(&mut self) {
        if self.shutting_down {
            return;
        }

        let capacity = self.config.max_concurrent.max(1);
        while self.live_workers() < capacity {
            let next = self.pending.iter().position(|id| {
                self.entries.get(id).is_some_and(|entry| {
                    entry.task.state == DownloadState::Pending && entry.worker.is_none()
                })
            });
            let Some(id) = next.and_then(|index| self.pending.remove(index)) else {
                break;
            };
            self.launch(&id);
        }
    }

    fn live_workers(&self) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.worker.is_some())
            .count()
    }

    fn launch(&mut self, id: &DownloadId) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        if !entry.task.transition(DownloadState::Downloading) {
            return;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        entry.worker = Some(ActiveWorker {
            generation,
            cancel: cancel.clone(),
        });
        entry.stop = None;

        debug!(download_id = %id, generation, offset = entry.task.bytes_received, "starting transfer");
        let job = WorkerJob::new(
            &entry.task,
            generation,
            self.config.retry.clone(),
            cancel,
            self.events.clone(),
        );
        tokio::spawn(worker::run(
            job,
            Arc::clone(&self.transport),
            self.worker_tx.clone(),
        ));
        self.dirty = true;
    }

    async fn on_worker(&mut self, message: WorkerMessage) {
        let WorkerMessage {
            id,
            generation,
            update,
        } = message;
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if entry.worker.as_ref().map(|worker| worker.generation) != Some(generation) {
            return;
        }

        match update {
            WorkerUpdate::AttemptStarted {
                attempt,
                resume_offset,
            } => {
                if !entry.is_stopping() {
                    entry.task.retry_count = attempt.saturating_sub(1);
                    self.events.emit_download(DownloadEvent::Started {
                        id: id.clone(),
                        url: entry.task.url.clone(),
                        resume_offset,
                    });
                }
            }
            WorkerUpdate::Progress(progress) => {
                entry
                    .task
                    .record_progress(progress.bytes_received, progress.total_bytes);
                self.dirty = true;
                announce_progress(&self.events, entry);
            }
            WorkerUpdate::Retrying {
                attempt,
                delay,
                error,
            } => {
                entry.task.retry_count = attempt;
                entry.task.last_error = Some(error.to_string());
                if !entry.is_stopping() {
                    self.events.emit_download(DownloadEvent::Retrying {
                        id: id.clone(),
                        attempt,
                        max_attempts: self.config.retry.max_attempts.max(1),
                        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        failure: FailureContext::from_error(&error),
                    });
                }
            }
            WorkerUpdate::Downloaded {
                bytes_received,
                total_bytes,
                extract,
            } => {
                entry
                    .task
                    .record_progress(bytes_received, Some(total_bytes.unwrap_or(bytes_received)));
                self.dirty = true;
                announce_progress(&self.events, entry);

                if entry.task.state != DownloadState::Downloading {
                    // Paused or cancelled at the finish line; settled when the worker exits
                    return;
                }
                if entry.task.auto_extract {
                    entry.task.transition(DownloadState::Extracting);
                    let _ = extract.send(true);
                    return;
                }

                entry.task.transition(DownloadState::Completed);
                info!(download_id = %id, bytes = entry.task.bytes_received, "download complete");
                self.events.emit_download(DownloadEvent::Completed {
                    id: id.clone(),
                    destination_path: entry.task.file_path(),
                    bytes_received: entry.task.bytes_received,
                });
                self.finish(&id);
            }
            WorkerUpdate::Interrupted { bytes_received } => {
                entry.task.record_progress(bytes_received, None);
                self.dirty = true;
            }
            WorkerUpdate::Failed {
                error,
                bytes_persisted,
            } => {
                entry.task.record_progress(bytes_persisted, None);
                self.dirty = true;
                if entry.task.state != DownloadState::Downloading {
                    return;
                }

                entry.task.last_error = Some(error.to_string());
                entry.task.transition(DownloadState::Failed);
                self.events.emit_download(DownloadEvent::Failed {
                    id: id.clone(),
                    failure: FailureContext::from_error(&error),
                });
                self.finish(&id);
            }
            WorkerUpdate::Extracted(result) => {
                if entry.task.state != DownloadState::Extracting {
                    return;
                }
                match result {
                    Ok(report) => {
                        info!(download_id = %id, entries = report.entries, "download extracted");
                        entry.task.transition(DownloadState::Extracted);
                    }
                    Err(error) => {
                        entry.task.last_error = Some(error.to_string());
                        entry.task.transition(DownloadState::ExtractionFailed);
                    }
                }
                self.finish(&id);
            }
            WorkerUpdate::Exited => {
                entry.worker = None;
                let stop = entry.stop.take();
                let state = entry.task.state;

                match state {
                    DownloadState::Cancelled if stop == Some(StopReason::Cancel) => {
                        self.finalize_cancel(&id).await;
                    }
                    DownloadState::Downloading | DownloadState::Extracting => {
                        // Exited without reporting an outcome
                        warn!(download_id = %id, %state, "worker exited early");
                        entry.task.state = DownloadState::Paused;
                    }
                    _ => {}
                }

                self.resolve_waiters(&id);
                self.admit();
                self.checkpoint().await;
            }
        }
    }

    /// Bookkeeping for a task that reached a terminal state
    fn finish(&mut self, id: &DownloadId) {
        self.dirty = true;
        if !self.finished.contains(id) {
            self.finished.push_back(id.clone());
        }
        self.resolve_waiters(id);

        while self.finished.len() > self.config.retain_finished {
            let evictable = self.finished.iter().position(|finished| {
                self.entries
                    .get(finished)
                    .is_none_or(|entry| entry.worker.is_none())
            });
            let Some(old) = evictable.and_then(|index| self.finished.remove(index)) else {
                break;
            };
            self.entries.remove(&old);
        }
    }

    fn resolve_waiters(&mut self, id: &DownloadId) {
        let Some(entry) = self.entries.get_mut(id) else {
            return;
        };
        if !entry.task.state.is_terminal() || entry.worker.is_some() {
            return;
        }
        for waiter in entry.waiters.drain(..) {
            let _ = waiter.send(Some(entry.task.clone()));
        }
    }

    async fn shutdown(&mut self, workers: &mut UnboundedReceiver<WorkerMessage>) {
        self.shutting_down = true;

        for (id, entry) in &mut self.entries {
            if entry.task.state != DownloadState::Downloading {
                continue;
            }
            entry.task.transition(DownloadState::Paused);
            entry.stop = Some(StopReason::Shutdown);
            if let Some(worker) = &entry.worker {
                worker.cancel.cancel();
            }
            self.events.emit_download(DownloadEvent::Paused {
                id: id.clone(),
                bytes_received: entry.task.bytes_received,
            });
        }

        while self.live_workers() > 0 {
            match workers.recv().await {
                Some(message) => self.on_worker(message).await,
                None => break,
            }
        }

        self.checkpoint().await;
        for entry in self.entries.values_mut() {
            // Callers waiting on unfinished tasks learn the manager is gone
            entry.waiters.clear();
        }
    }

    async fn checkpoint(&mut self) {
        self.dirty = false;
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store
            .save(self.entries.values().map(|entry| &entry.task))
            .await
        {
            warn!(path = %store.path().display(), error = %e, "failed to write download checkpoint");
            self.dirty = true;
        }
    }
}

/// Emit a progress event if the count moved past what subscribers have seen
fn announce_progress(events: &EventBus, entry: &mut Entry) {
    if entry.is_stopping() || entry.task.bytes_received <= entry.reported {
        return;
    }
    entry.reported = entry.task.bytes_received;
    events.emit_download(DownloadEvent::Progress {
        id: entry.task.id.clone(),
        bytes_received: entry.task.bytes_received,
        total_bytes: entry.task.total_bytes,
    });
}

/// Last non-empty path segment of the URL, or a fixed fallback
fn file_name_from_url(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.rfind(|segment| !segment.is_empty()))
        .map(percent_decode)
        .filter(|name| is_plain_file_name(name))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

fn percent_decode(segment: &str) -> String {
    let escaped = segment.replace('+', "%2B");
    url::form_urlencoded::parse(format!("n={escaped}").as_bytes())
        .next()
        .map_or_else(|| segment.to_string(), |(_, value)| value.into_owned())
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\', '\0'])
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial download"),
    }
}
