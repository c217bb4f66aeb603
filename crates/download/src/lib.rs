#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Download manager for fetchup
//!
//! A single actor owns the task registry. [`DownloadManager`] is a cheap,
//! cloneable handle that sends it commands; transfers run in worker tasks
//! bounded by the configured concurrency, and non-terminal task progress is
//! checkpointed so downloads survive a restart in the `Paused` state.

mod actor;
pub mod checkpoint;
mod command;
mod config;
mod worker;

pub use checkpoint::CheckpointStore;
pub use config::ManagerConfig;

use actor::Actor;
use command::Command;
use fetchup_config::Config;
use fetchup_errors::{DownloadError, Error};
use fetchup_events::EventBus;
use fetchup_net::{HttpTransport, Transport};
use fetchup_types::{CommandOutcome, DownloadId, DownloadRequest, DownloadTask};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Handle to a running download manager
#[derive(Clone)]
pub struct DownloadManager {
    commands: mpsc::UnboundedSender<Command>,
    events: EventBus,
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("running", &!self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

impl DownloadManager {
    /// Start a manager with the given transport
    ///
    /// Tasks found in the checkpoint file are registered as `Paused`.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint file exists but cannot be read.
    pub async fn start(
        config: ManagerConfig,
        transport: Arc<dyn Transport>,
        events: EventBus,
    ) -> Result<Self, Error> {
        let restored = match &config.checkpoint_path {
            Some(path) => {
                let mut tasks = CheckpointStore::new(path).load().await?;
                tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                tasks
            }
            None => Vec::new(),
        };
        debug!(restored = restored.len(), max_concurrent = config.max_concurrent, "starting download manager");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let actor = Actor::new(config, transport, events.clone(), restored, worker_tx);
        tokio::spawn(actor.run(command_rx, worker_rx));

        Ok(Self {
            commands: command_tx,
            events,
        })
    }

    /// Start a manager over HTTP using the application configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the checkpoint
    /// cannot be read.
    pub async fn from_config(config: &Config, events: EventBus) -> Result<Self, Error> {
        let transport = HttpTransport::from_config(&config.network)?;
        Self::start(ManagerConfig::from_config(config), Arc::new(transport), events).await
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register and queue a download
    ///
    /// # Errors
    ///
    /// Returns an error if the URL or file name is invalid, a non-terminal
    /// task already uses the id, or the manager has stopped.
    pub async fn start_download(&self, request: DownloadRequest) -> Result<DownloadTask, Error> {
        self.call(|reply| Command::Start { request, reply }).await?
    }

    /// Pause a queued or transferring task
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager has stopped.
    pub async fn pause(&self, id: &DownloadId) -> Result<CommandOutcome, Error> {
        let id = id.clone();
        self.call(|reply| Command::Pause { id, reply }).await
    }

    /// Queue a paused task again, continuing from its persisted bytes
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager has stopped.
    pub async fn resume(&self, id: &DownloadId) -> Result<CommandOutcome, Error> {
        let id = id.clone();
        self.call(|reply| Command::Resume { id, reply }).await
    }

    /// Cancel a task and delete its partial file
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager has stopped.
    pub async fn cancel(&self, id: &DownloadId) -> Result<CommandOutcome, Error> {
        let id = id.clone();
        self.call(|reply| Command::Cancel { id, reply }).await
    }

    /// Forget a terminal task
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager has stopped.
    pub async fn remove(&self, id: &DownloadId) -> Result<CommandOutcome, Error> {
        let id = id.clone();
        self.call(|reply| Command::Remove { id, reply }).await
    }

    /// # Errors
    ///
    /// Returns an error only if the manager has stopped.
    pub async fn get(&self, id: &DownloadId) -> Result<Option<DownloadTask>, Error> {
        let id = id.clone();
        self.call(|reply| Command::Get { id, reply }).await
    }

    /// All registered tasks, oldest first
    ///
    /// # Errors
    ///
    /// Returns an error only if the manager has stopped.
    pub async fn list(&self) -> Result<Vec<DownloadTask>, Error> {
        self.call(|reply| Command::List { reply }).await
    }

    /// Wait until the task reaches a terminal state
    ///
    /// # Errors
    ///
    /// Returns an error if the task is unknown or the manager stops first.
    pub async fn wait(&self, id: &DownloadId) -> Result<DownloadTask, Error> {
        let key = id.clone();
        self.call(|reply| Command::Wait { id: key, reply })
            .await?
            .ok_or_else(|| DownloadError::TaskNotFound { id: id.to_string() }.into())
    }

    /// Stop all transfers, checkpoint them as `Paused` and stop the actor
    ///
    /// # Errors
    ///
    /// Returns an error if the manager had already stopped.
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.call(|reply| Command::Shutdown { reply }).await
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, Error> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .map_err(|_| DownloadError::ManagerStopped)?;
        response
            .await
            .map_err(|_| DownloadError::ManagerStopped.into())
    }
}
