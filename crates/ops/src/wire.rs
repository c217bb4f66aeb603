//! JSON-lines envelopes for the boundary
//!
//! Requests arrive as `{"id": n, "command": "<name>", "payload": {...}}`.
//! Responses and events leave as objects tagged with `"type"`. Unknown
//! total sizes are sent as `-1`.

use crate::{Command, OperationResult};
use fetchup_errors::{DownloadError, Error};
use fetchup_events::{
    AppEvent, DownloadEvent, EventMessage, ExtractEvent, FailureContext, UpdateEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One inbound request line
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    pub id: u64,
    pub command: String,
    #[serde(default)]
    pub payload: Value,
}

impl Request {
    /// Parse a request line
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidRequest` if the line is not a request.
    pub fn parse(line: &str) -> Result<Self, Error> {
        serde_json::from_str(line).map_err(|e| {
            DownloadError::InvalidRequest {
                message: format!("malformed request: {e}"),
            }
            .into()
        })
    }

    /// Decode the command carried by this request
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidRequest` for unknown commands or bad payloads.
    pub fn command(&self) -> Result<Command, Error> {
        Command::from_parts(&self.command, self.payload.clone())
    }
}

/// One outbound line
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Response(Response),
    Event(WireEvent),
}

impl Outbound {
    /// Serialize as a single line
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_line(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// Echo of the request id; absent when the request could not be parsed
    pub id: Option<u64>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<OperationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureContext>,
}

impl Response {
    #[must_use]
    pub fn from_result(id: Option<u64>, result: Result<OperationResult, Error>) -> Self {
        match result {
            Ok(result) => Self {
                id,
                ok: true,
                result: Some(result),
                error: None,
            },
            Err(e) => Self {
                id,
                ok: false,
                result: None,
                error: Some(FailureContext::from_error(&e)),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WireEvent {
    pub name: &'static str,
    pub payload: Value,
}

impl WireEvent {
    #[must_use]
    pub fn from_message(message: &EventMessage) -> Self {
        Self {
            name: message.event.event_name(),
            payload: payload(&message.event),
        }
    }
}

fn total(total_bytes: Option<u64>) -> i64 {
    total_bytes
        .and_then(|total| i64::try_from(total).ok())
        .unwrap_or(-1)
}

fn failure_fields(failure: &FailureContext) -> Value {
    json!({
        "errorKind": failure.kind,
        "code": failure.code,
        "message": failure.message,
        "hint": failure.hint,
        "retryable": failure.retryable,
    })
}

fn merge(mut base: Value, extra: Value) -> Value {
    if let (Value::Object(base), Value::Object(extra)) = (&mut base, extra) {
        base.extend(extra);
    }
    base
}

fn payload(event: &AppEvent) -> Value {
    match event {
        AppEvent::Download(event) => download(event),
        AppEvent::Extract(event) => extract(event),
        AppEvent::Update(event) => update(event),
    }
}

fn download(event: &DownloadEvent) -> Value {
    match event {
        DownloadEvent::Queued {
            id,
            url,
            destination_path,
            position,
        } => json!({
            "downloadId": id,
            "url": url,
            "destinationPath": destination_path,
            "position": position,
        }),
        DownloadEvent::Started {
            id,
            url,
            resume_offset,
        } => json!({
            "downloadId": id,
            "url": url,
            "resumeOffset": resume_offset,
        }),
        DownloadEvent::Progress {
            id,
            bytes_received,
            total_bytes,
        } => json!({
            "downloadId": id,
            "bytesReceived": bytes_received,
            "totalBytes": total(*total_bytes),
        }),
        DownloadEvent::Paused { id, bytes_received }
        | DownloadEvent::Resumed { id, bytes_received } => json!({
            "downloadId": id,
            "bytesReceived": bytes_received,
        }),
        DownloadEvent::Retrying {
            id,
            attempt,
            max_attempts,
            delay_ms,
            failure,
        } => merge(
            json!({
                "downloadId": id,
                "attempt": attempt,
                "maxAttempts": max_attempts,
                "delayMs": delay_ms,
            }),
            failure_fields(failure),
        ),
        DownloadEvent::Completed {
            id,
            destination_path,
            bytes_received,
        } => json!({
            "downloadId": id,
            "destinationPath": destination_path,
            "bytesReceived": bytes_received,
        }),
        DownloadEvent::Failed { id, failure } => {
            merge(json!({ "downloadId": id }), failure_fields(failure))
        }
        DownloadEvent::Cancelled { id } => json!({ "downloadId": id }),
    }
}

fn extract(event: &ExtractEvent) -> Value {
    match event {
        ExtractEvent::Started {
            id,
            archive,
            destination_path,
        } => json!({
            "downloadId": id,
            "archivePath": archive,
            "destinationPath": destination_path,
        }),
        ExtractEvent::EntryExtracted {
            id,
            entry,
            index,
            total,
        } => json!({
            "downloadId": id,
            "entry": entry,
            "index": index,
            "total": total,
        }),
        ExtractEvent::Completed {
            id,
            archive,
            destination_path,
            entries,
        } => json!({
            "downloadId": id,
            "success": true,
            "archivePath": archive,
            "destinationPath": destination_path,
            "entries": entries,
        }),
        ExtractEvent::Failed {
            id,
            archive,
            failure,
        } => merge(
            json!({
                "downloadId": id,
                "success": false,
                "archivePath": archive,
            }),
            failure_fields(failure),
        ),
    }
}

fn update(event: &UpdateEvent) -> Value {
    match event {
        UpdateEvent::CheckStarted { current } | UpdateEvent::UpToDate { current } => {
            json!({ "currentVersion": current })
        }
        UpdateEvent::Available { current, available } => json!({
            "currentVersion": current,
            "version": available,
        }),
        UpdateEvent::DownloadStarted { version, id } => json!({
            "version": version,
            "downloadId": id,
        }),
        UpdateEvent::DownloadProgress {
            version,
            id,
            bytes_received,
            total_bytes,
        } => json!({
            "version": version,
            "downloadId": id,
            "bytesReceived": bytes_received,
            "totalBytes": total(*total_bytes),
        }),
        UpdateEvent::Verified { version, path } => json!({
            "version": version,
            "filePath": path,
        }),
        UpdateEvent::BackupCreated { backup } => json!({
            "backupPath": backup.path,
            "sourceVersion": backup.source_version,
        }),
        UpdateEvent::Installing {
            artifact,
            install_dir,
        } => json!({
            "filePath": artifact,
            "installDir": install_dir,
        }),
        UpdateEvent::Installed {
            install_dir,
            backup_path,
        } => json!({
            "installDir": install_dir,
            "backupPath": backup_path,
        }),
        UpdateEvent::Confirmed { backup_path }
        | UpdateEvent::RollbackStarted { backup_path }
        | UpdateEvent::RolledBack { backup_path } => json!({ "backupPath": backup_path }),
        UpdateEvent::Failed { stage, failure } => {
            merge(json!({ "stage": stage }), failure_fields(failure))
        }
        UpdateEvent::RollbackFailed {
            backup_path,
            failure,
        } => merge(json!({ "backupPath": backup_path }), failure_fields(failure)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchup_errors::{ErrorKind, NetworkError};
    use fetchup_types::{CommandOutcome, DownloadId};
    use std::path::PathBuf;

    fn wire(event: AppEvent) -> Value {
        let message = EventMessage::from_event(event);
        let outbound = Outbound::Event(WireEvent::from_message(&message));
        serde_json::from_str(&outbound.to_line().unwrap()).unwrap()
    }

    #[test]
    fn progress_uses_sentinel_for_unknown_total() {
        let line = wire(AppEvent::Download(DownloadEvent::Progress {
            id: DownloadId::new("d1"),
            bytes_received: 400,
            total_bytes: None,
        }));
        assert_eq!(line["type"], "event");
        assert_eq!(line["name"], "download-progress");
        assert_eq!(line["payload"]["downloadId"], "d1");
        assert_eq!(line["payload"]["bytesReceived"], 400);
        assert_eq!(line["payload"]["totalBytes"], -1);
    }

    #[test]
    fn completion_and_failure_payloads() {
        let done = wire(AppEvent::Download(DownloadEvent::Completed {
            id: DownloadId::new("d1"),
            destination_path: PathBuf::from("/tmp/a.bin"),
            bytes_received: 1000,
        }));
        assert_eq!(done["name"], "download-complete");
        assert_eq!(done["payload"]["destinationPath"], "/tmp/a.bin");

        let error: Error = NetworkError::HttpError {
            status: 404,
            message: "Not Found".into(),
        }
        .into();
        let failed = wire(AppEvent::Download(DownloadEvent::Failed {
            id: DownloadId::new("d1"),
            failure: FailureContext::from_error(&error),
        }));
        assert_eq!(failed["name"], "download-error");
        assert_eq!(failed["payload"]["downloadId"], "d1");
        assert_eq!(failed["payload"]["errorKind"], "permanent_transfer");
        assert!(failed["payload"]["message"].is_string());
    }

    #[test]
    fn update_progress_has_its_own_name() {
        let line = wire(AppEvent::Update(UpdateEvent::DownloadProgress {
            version: fetchup_types::Version::new(2, 0, 0),
            id: DownloadId::new("update-2.0.0"),
            bytes_received: 10,
            total_bytes: Some(20),
        }));
        assert_eq!(line["name"], "update-download-progress");
        assert_eq!(line["payload"]["totalBytes"], 20);
        assert_eq!(line["payload"]["version"], "2.0.0");
    }

    #[test]
    fn responses_carry_result_or_failure() {
        let ok = Outbound::Response(Response::from_result(
            Some(7),
            Ok(OperationResult::Command(CommandOutcome::Applied)),
        ));
        let ok: Value = serde_json::from_str(&ok.to_line().unwrap()).unwrap();
        assert_eq!(ok["type"], "response");
        assert_eq!(ok["id"], 7);
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["result"]["type"], "command");
        assert_eq!(ok["result"]["data"]["outcome"], "applied");
        assert!(ok.get("error").is_none());

        let err = Response::from_result(
            Some(8),
            Err(DownloadError::TaskNotFound { id: "nope".into() }.into()),
        );
        assert!(!err.ok);
        assert_eq!(err.error.unwrap().kind, ErrorKind::NotFound);
    }

    #[test]
    fn request_lines_decode_to_commands() {
        let request =
            Request::parse(r#"{"id": 3, "command": "cancel-download", "payload": {"downloadId": "d1"}}"#)
                .unwrap();
        assert_eq!(request.id, 3);
        assert_eq!(request.command().unwrap().name(), "cancel-download");

        let bare = Request::parse(r#"{"id": 4, "command": "get-backups"}"#).unwrap();
        assert_eq!(bare.command().unwrap(), Command::GetBackups);

        assert!(Request::parse("not json").is_err());
    }
}
