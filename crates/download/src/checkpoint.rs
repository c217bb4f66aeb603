//! Durable task progress
//!
//! Non-terminal tasks are written to a JSON file with a temp file and a
//! rename, so a crash mid-write leaves the previous checkpoint intact.

use fetchup_errors::Error;
use fetchup_types::{DownloadState, DownloadTask};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    version: u32,
    tasks: Vec<DownloadTask>,
}

/// Reads and writes the task checkpoint file
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load persisted tasks, ready to be registered.
    ///
    /// Tasks that were queued, transferring or extracting come back as
    /// `Paused` at their last checkpoint; a missing or unreadable file
    /// yields no tasks.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file exists but cannot be read.
    pub async fn load(&self) -> Result<Vec<DownloadTask>, Error> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io_with_path(&e, &self.path)),
        };

        let file: CheckpointFile = match serde_json::from_slice(&data) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable download checkpoint");
                return Ok(Vec::new());
            }
        };

        let tasks = file
            .tasks
            .into_iter()
            .filter(|task| !task.state.is_terminal())
            .map(restore)
            .collect::<Vec<_>>();
        debug!(path = %self.path.display(), count = tasks.len(), "loaded download checkpoint");
        Ok(tasks)
    }

    /// Persist the non-terminal tasks among `tasks`
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file
    /// cannot be written and renamed into place.
    pub async fn save<'a>(&self, tasks: impl IntoIterator<Item = &'a DownloadTask>) -> Result<(), Error> {
        let file = CheckpointFile {
            version: FORMAT_VERSION,
            tasks: tasks
                .into_iter()
                .filter(|task| !task.state.is_terminal())
                .cloned()
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_with_path(&e, parent))?;
        }

        let tmp = self.path.with_extension("json.tmp");
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

        fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::io_with_path(&e, &self.path))
    }
}

/// Tasks never come back as active after a restart
fn restore(mut task: DownloadTask) -> DownloadTask {
    if matches!(
        task.state,
        DownloadState::Pending | DownloadState::Downloading | DownloadState::Extracting
    ) {
        task.state = DownloadState::Paused;
    }
    task
}
