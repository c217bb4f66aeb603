//! Output rendering and formatting

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use console::Style;
use fetchup_ops::OperationResult;
use fetchup_types::{Backup, BackupStatus, CommandOutcome, DownloadState, DownloadTask, UpdateCheck};
use std::io;

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    json_output: bool,
}

impl OutputRenderer {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    /// Render operation result
    pub fn render_result(&self, result: &OperationResult) -> io::Result<()> {
        if self.json_output {
            let json = result.to_json().map_err(io::Error::other)?;
            println!("{json}");
            return Ok(());
        }

        match result {
            OperationResult::Download(task) => render_task(task),
            OperationResult::Command(outcome) => render_outcome(*outcome),
            OperationResult::Downloads(tasks) => render_tasks(tasks),
            OperationResult::UpdateCheck(check) => render_check(check),
            OperationResult::UpdatePackage(package) => {
                let location = package
                    .local_path
                    .as_ref()
                    .map_or_else(|| package.download_url.clone(), |p| p.display().to_string());
                success(&format!("Verified {} at {location}", package.version));
            }
            OperationResult::Install(report) => {
                success(&format!(
                    "Installed {} files into {} in {} ms",
                    report.files,
                    report.install_dir.display(),
                    report.duration_ms
                ));
                println!("Backup: {}", report.backup.path.display());
            }
            OperationResult::Rollback(report) => success(&format!(
                "Restored {} files into {} from {}",
                report.files,
                report.install_dir.display(),
                report.backup_path.display()
            )),
            OperationResult::Backups(backups) => render_backups(backups),
            OperationResult::Confirmed(backup) => match backup {
                Some(backup) => success(&format!(
                    "Confirmed; backup {} is no longer the rollback target",
                    backup.path.display()
                )),
                None => println!("Nothing to confirm."),
            },
            OperationResult::Extraction(report) => success(&format!(
                "Extracted {} entries ({} bytes) into {}",
                report.entries,
                report.bytes_written,
                report.destination.display()
            )),
        }
        Ok(())
    }
}

fn success(message: &str) {
    println!("{}", Style::new().green().apply_to(message));
}

fn render_task(task: &DownloadTask) {
    match task.state {
        DownloadState::Completed => success(&format!(
            "Downloaded {} ({} bytes)",
            task.file_path().display(),
            task.bytes_received
        )),
        DownloadState::Extracted => success(&format!("Extracted into {}", task.extract_dir().display())),
        state => println!("{} {state} ({} bytes)", task.id, task.bytes_received),
    }
}

fn render_outcome(outcome: CommandOutcome) {
    match outcome {
        CommandOutcome::Applied => success("Done."),
        CommandOutcome::NoOp { state } => println!("Nothing to do; task is {state}."),
        CommandOutcome::NotFound => println!("No such task."),
    }
}

fn render_check(check: &UpdateCheck) {
    match check {
        UpdateCheck::UpToDate { current } => success(&format!("Up to date ({current}).")),
        UpdateCheck::Available { package } => {
            println!(
                "{} {}",
                Style::new().yellow().bold().apply_to("Update available:"),
                package.version
            );
            println!("  {}", package.download_url);
        }
    }
}

fn render_tasks(tasks: &[DownloadTask]) {
    if tasks.is_empty() {
        println!("No downloads.");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Id").add_attribute(Attribute::Bold),
        Cell::new("State").add_attribute(Attribute::Bold),
        Cell::new("Received").add_attribute(Attribute::Bold),
        Cell::new("Total").add_attribute(Attribute::Bold),
        Cell::new("File").add_attribute(Attribute::Bold),
    ]);
    for task in tasks {
        table.add_row(vec![
            Cell::new(&task.id),
            Cell::new(task.state),
            Cell::new(task.bytes_received),
            Cell::new(task.total_bytes.map_or_else(|| "-".to_string(), |t| t.to_string())),
            Cell::new(task.file_path().display()),
        ]);
    }
    println!("{table}");
}

fn render_backups(backups: &[Backup]) {
    if backups.is_empty() {
        println!("No backups.");
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Version").add_attribute(Attribute::Bold),
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Created").add_attribute(Attribute::Bold),
        Cell::new("Path").add_attribute(Attribute::Bold),
    ]);
    for backup in backups.iter().rev() {
        let status = match backup.status {
            BackupStatus::RollbackTarget => Cell::new("rollback target").fg(Color::Green),
            BackupStatus::Obsolete => Cell::new("obsolete").fg(Color::DarkGrey),
            BackupStatus::Restored => Cell::new("restored").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&backup.source_version),
            status,
            Cell::new(backup.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(backup.path.display()),
        ]);
    }
    println!("{table}");
}
