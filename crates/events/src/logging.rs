//! Tracing integration for published events
//!
//! Every message published on the bus is recorded here, at the level chosen
//! by [`AppEvent::log_level`] and under a per-domain target.

use tracing::Level;

use crate::{AppEvent, DownloadEvent, EventMessage, UpdateEvent};

macro_rules! log_at {
    ($level:expr, $target:literal, $($fields:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!(target: $target, $($fields)+),
            Level::WARN => tracing::warn!(target: $target, $($fields)+),
            Level::INFO => tracing::info!(target: $target, $($fields)+),
            Level::DEBUG => tracing::debug!(target: $target, $($fields)+),
            Level::TRACE => tracing::trace!(target: $target, $($fields)+),
        }
    };
}

/// Record an event through `tracing` with structured fields
pub fn log_event(message: &EventMessage) {
    let meta = &message.meta;
    let level = meta.tracing_level();
    let name = message.event.event_name();

    match &message.event {
        AppEvent::Download(event) => match event {
            DownloadEvent::Progress {
                id,
                bytes_received,
                total_bytes,
            } => log_at!(
                level,
                "fetchup::events::download",
                event = name,
                sequence = meta.sequence,
                download_id = %id,
                bytes = bytes_received,
                total = ?total_bytes,
                "Download progress"
            ),
            DownloadEvent::Failed { id, failure } => log_at!(
                level,
                "fetchup::events::download",
                event = name,
                sequence = meta.sequence,
                download_id = %id,
                kind = %failure.kind,
                message = %failure.message,
                "Download failed"
            ),
            DownloadEvent::Retrying {
                id,
                attempt,
                delay_ms,
                failure,
                ..
            } => log_at!(
                level,
                "fetchup::events::download",
                event = name,
                sequence = meta.sequence,
                download_id = %id,
                attempt = attempt,
                delay_ms = delay_ms,
                message = %failure.message,
                "Download retrying"
            ),
            other => log_at!(
                level,
                "fetchup::events::download",
                event = name,
                sequence = meta.sequence,
                download_id = %other.id(),
                "Download event"
            ),
        },
        AppEvent::Extract(event) => log_at!(
            level,
            "fetchup::events::extract",
            event = name,
            sequence = meta.sequence,
            correlation = ?meta.correlation_id,
            detail = ?event,
            "Extraction event"
        ),
        AppEvent::Update(event) => match event {
            UpdateEvent::Failed { stage, failure } => log_at!(
                level,
                "fetchup::events::update",
                event = name,
                sequence = meta.sequence,
                stage = ?stage,
                kind = %failure.kind,
                message = %failure.message,
                "Update failed"
            ),
            UpdateEvent::RollbackFailed {
                backup_path,
                failure,
            } => log_at!(
                level,
                "fetchup::events::update",
                event = name,
                sequence = meta.sequence,
                backup_path = %backup_path.display(),
                message = %failure.message,
                "Rollback failed; restore manually from the backup"
            ),
            other => log_at!(
                level,
                "fetchup::events::update",
                event = name,
                sequence = meta.sequence,
                correlation = ?meta.correlation_id,
                detail = ?other,
                "Update event"
            ),
        },
    }
}
