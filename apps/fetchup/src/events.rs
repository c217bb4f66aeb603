//! Event handling and progress display for one-shot commands

use console::{Style, Term};
use fetchup_events::{AppEvent, DownloadEvent, EventMessage, ExtractEvent, UpdateEvent};

/// Prints progress and lifecycle notices to stderr
pub struct EventHandler {
    term: Term,
    quiet: bool,
    last_percent: Option<u64>,
}

impl EventHandler {
    /// A quiet handler only reports failures
    pub fn new(quiet: bool) -> Self {
        Self {
            term: Term::stderr(),
            quiet,
            last_percent: None,
        }
    }

    pub fn handle_event(&mut self, message: &EventMessage) {
        match &message.event {
            AppEvent::Download(event) => self.handle_download(event),
            AppEvent::Extract(event) => self.handle_extract(event),
            AppEvent::Update(event) => self.handle_update(event),
        }
    }

    fn handle_download(&mut self, event: &DownloadEvent) {
        match event {
            DownloadEvent::Started {
                url, resume_offset, ..
            } => {
                if *resume_offset > 0 {
                    self.status(&format!("Resuming {url} at {resume_offset} bytes"));
                } else {
                    self.status(&format!("Downloading {url}"));
                }
            }
            DownloadEvent::Progress {
                bytes_received,
                total_bytes,
                ..
            } => self.progress(*bytes_received, *total_bytes),
            DownloadEvent::Retrying {
                attempt,
                max_attempts,
                delay_ms,
                failure,
                ..
            } => self.warn(&format!(
                "{} (attempt {attempt}/{max_attempts}, retrying in {delay_ms} ms)",
                failure.message
            )),
            DownloadEvent::Failed { failure, .. } => self.fail(&failure.message),
            DownloadEvent::Queued { .. }
            | DownloadEvent::Paused { .. }
            | DownloadEvent::Resumed { .. }
            | DownloadEvent::Completed { .. }
            | DownloadEvent::Cancelled { .. } => {}
        }
    }

    fn handle_extract(&mut self, event: &ExtractEvent) {
        match event {
            ExtractEvent::Started { archive, .. } => {
                self.status(&format!("Extracting {}", archive.display()));
            }
            ExtractEvent::Failed { failure, .. } => self.fail(&failure.message),
            ExtractEvent::EntryExtracted { .. } | ExtractEvent::Completed { .. } => {}
        }
    }

    fn handle_update(&mut self, event: &UpdateEvent) {
        match event {
            UpdateEvent::DownloadProgress {
                bytes_received,
                total_bytes,
                ..
            } => self.progress(*bytes_received, *total_bytes),
            UpdateEvent::BackupCreated { backup } => {
                self.status(&format!("Backed up to {}", backup.path.display()));
            }
            UpdateEvent::RollbackStarted { backup_path } => {
                self.warn(&format!("Rolling back from {}", backup_path.display()));
            }
            UpdateEvent::Failed { stage, failure } => {
                self.fail(&format!("{stage:?} failed: {}", failure.message));
            }
            UpdateEvent::RollbackFailed {
                backup_path,
                failure,
            } => {
                // Always shown: the user has to restore by hand
                let _ = self.term.write_line(&format!(
                    "{} {}\n  Restore manually from {}",
                    Style::new().red().bold().apply_to("Rollback failed:"),
                    failure.message,
                    backup_path.display()
                ));
            }
            _ => {}
        }
    }

    fn progress(&mut self, received: u64, total: Option<u64>) {
        if self.quiet {
            return;
        }
        let Some(total) = total.filter(|total| *total > 0) else {
            let _ = self.term.clear_line();
            let _ = self.term.write_str(&format!("{received} bytes"));
            return;
        };
        let percent = received.saturating_mul(100) / total;
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        let _ = self.term.clear_line();
        let _ = self.term.write_str(&format!("{percent:>3}% {received}/{total} bytes"));
        if percent >= 100 {
            let _ = self.term.write_line("");
        }
    }

    fn status(&self, message: &str) {
        if !self.quiet {
            let _ = self.term.write_line(message);
        }
    }

    fn warn(&self, message: &str) {
        if !self.quiet {
            let _ = self
                .term
                .write_line(&Style::new().yellow().apply_to(message).to_string());
        }
    }

    fn fail(&self, message: &str) {
        let _ = self
            .term
            .write_line(&Style::new().red().apply_to(message).to_string());
    }
}
