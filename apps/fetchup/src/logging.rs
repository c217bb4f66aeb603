//! tracing-subscriber setup
//!
//! Logs always go to stderr; stdout carries results and, in `serve` mode,
//! the wire protocol.

use tracing_subscriber::EnvFilter;

fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("info,fetchup=debug,fetchup_download=debug,fetchup_update=debug")
        } else {
            EnvFilter::new("info")
        }
    })
}

/// Initialize tracing
pub fn init_tracing(json_logs: bool, debug: bool) {
    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter(debug))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(filter(debug))
            .init();
    }
}
