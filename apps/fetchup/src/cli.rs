//! Command line interface definition

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fetchup - resumable downloads and self-updates with rollback
#[derive(Parser, Debug)]
#[command(name = "fetchup")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Resumable downloads and self-updates with rollback")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Global arguments available for all commands
#[derive(Parser, Debug)]
pub struct GlobalArgs {
    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Raise the log level to debug
    #[arg(long, global = true)]
    pub debug: bool,

    /// Write logs to stderr as JSON
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Use alternate config file
    #[arg(long, global = true, value_name = "PATH", env = "FETCHUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the number of simultaneous transfers
    #[arg(long, global = true, value_name = "N")]
    pub max_concurrent: Option<usize>,

    /// Override the installation directory
    #[arg(long, global = true, value_name = "DIR")]
    pub install_dir: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve JSON-lines requests on stdin and write responses and events to stdout
    Serve,

    /// Download a file, resuming a previous partial download of the same id
    Get {
        url: String,

        /// Destination directory
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// File name inside the destination directory
        #[arg(short = 'o', long)]
        output: Option<String>,

        /// Task id; reuse it to resume
        #[arg(long)]
        id: Option<String>,

        /// Unpack the archive after download and delete it
        #[arg(short = 'x', long)]
        extract: bool,
    },

    /// Ask the release manifest for a newer version
    Check,

    /// List installation backups
    Backups,

    /// Restore the installation from a backup
    Rollback {
        /// Backup directory as listed by `fetchup backups`
        path: PathBuf,
    },
}
