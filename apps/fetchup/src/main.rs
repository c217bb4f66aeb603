//! fetchup - resumable downloads and self-updates with rollback
//!
//! The binary hosts the operations layer either as a JSON-lines server
//! (`fetchup serve`) or as one-shot commands.

mod cli;
mod display;
mod error;
mod events;
mod logging;
mod serve;

use crate::cli::{Cli, Commands, GlobalArgs};
use crate::display::OutputRenderer;
use crate::error::CliError;
use crate::events::EventHandler;
use clap::Parser;
use fetchup_config::Config;
use fetchup_errors::Error;
use fetchup_ops::{Command, DownloadFileArgs, OperationResult, OpsCtx, RollbackUpdateArgs};
use fetchup_types::{DownloadId, DownloadState};
use std::collections::BTreeMap;
use std::future::Future;
use std::process;
use tokio::select;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.global.json_logs, cli.global.debug);

    let json_mode = cli.global.json;
    if let Err(e) = run(cli).await {
        error!("Application error: {e}");
        if !json_mode {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting fetchup v{}", env!("CARGO_PKG_VERSION"));

    // File (or defaults), then environment, then flags
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;
    apply_cli_config(&mut config, &cli.global);
    config.validate()?;

    let ctx = OpsCtx::from_config(config).await?;

    if matches!(cli.command, Commands::Serve) {
        return serve::run(ctx).await;
    }

    let renderer = OutputRenderer::new(cli.global.json);
    let mut handler = EventHandler::new(cli.global.json);
    let result = with_events(&ctx, &mut handler, execute_command(cli.command, &ctx)).await;

    if let Err(e) = ctx.shutdown().await {
        error!(error = %e, "shutdown failed");
    }
    renderer.render_result(&result?)?;
    Ok(())
}

/// Drive a command while printing the events it produces
async fn with_events<F>(
    ctx: &OpsCtx,
    handler: &mut EventHandler,
    command: F,
) -> Result<OperationResult, CliError>
where
    F: Future<Output = Result<OperationResult, CliError>>,
{
    let mut subscription = ctx.events.subscribe();
    let mut command = Box::pin(command);

    let result = loop {
        select! {
            result = &mut command => break result,
            Some(message) = subscription.recv() => handler.handle_event(&message),
        }
    };
    while let Some(message) = subscription.try_recv() {
        handler.handle_event(&message);
    }
    ctx.events.unsubscribe(subscription.id());
    result
}

async fn execute_command(command: Commands, ctx: &OpsCtx) -> Result<OperationResult, CliError> {
    let command = match command {
        Commands::Get {
            url,
            dir,
            output,
            id,
            extract,
        } => return get(ctx, url, dir, output, id, extract).await,
        Commands::Check => Command::CheckForUpdates,
        Commands::Backups => Command::GetBackups,
        Commands::Rollback { path } => Command::RollbackUpdate(RollbackUpdateArgs { backup_path: path }),
        Commands::Serve => {
            return Err(Error::internal("serve is not a one-shot command").into());
        }
    };
    Ok(fetchup_ops::execute(ctx, command).await?)
}

/// Start or resume a download and wait for it to finish
async fn get(
    ctx: &OpsCtx,
    url: String,
    destination: Option<std::path::PathBuf>,
    file_name: Option<String>,
    id: Option<String>,
    auto_extract: bool,
) -> Result<OperationResult, CliError> {
    // A task restored from the checkpoint resumes instead of starting over
    if let Some(id) = id.as_deref().map(DownloadId::from) {
        if let Ok(task) = fetchup_ops::get_download(ctx, &id).await {
            if task.state == DownloadState::Paused {
                fetchup_ops::resume_download(ctx, &id).await?;
                return finish(ctx, &id).await;
            }
        }
    }

    let args = DownloadFileArgs {
        url,
        file_name,
        destination,
        download_id: id.map(DownloadId::from),
        headers: BTreeMap::new(),
        show_directory_selector: false,
        auto_extract,
    };
    let task = fetchup_ops::download_file(ctx, args).await?;
    finish(ctx, &task.id).await
}

async fn finish(ctx: &OpsCtx, id: &DownloadId) -> Result<OperationResult, CliError> {
    let task = ctx.downloads.wait(id).await?;
    match task.state {
        DownloadState::Completed | DownloadState::Extracted => Ok(OperationResult::Download(task)),
        _ => Err(CliError::Incomplete(Box::new(task))),
    }
}

/// Apply CLI configuration overrides (highest precedence)
fn apply_cli_config(config: &mut Config, global: &GlobalArgs) {
    if let Some(max_concurrent) = global.max_concurrent {
        config.download.max_concurrent = max_concurrent;
    }
    if let Some(install_dir) = &global.install_dir {
        config.paths.install_dir = Some(install_dir.clone());
    }
}
