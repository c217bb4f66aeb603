//! Integration tests for events

#[cfg(test)]
mod tests {
    use fetchup_errors::{Error, ErrorKind, NetworkError};
    use fetchup_events::*;
    use fetchup_types::DownloadId;

    #[tokio::test]
    async fn test_emitter_helpers() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();

        bus.emit_download(DownloadEvent::Paused {
            id: DownloadId::new("d1"),
            bytes_received: 10,
        });
        bus.emit_extract(ExtractEvent::Completed {
            id: Some(DownloadId::new("d1")),
            archive: "d1.zip".into(),
            destination_path: "out".into(),
            entries: 2,
        });

        let first = sub.recv().await.unwrap();
        assert_eq!(first.event.event_name(), "download-paused");
        assert_eq!(first.meta.source, EventSource::Download);
        let second = sub.recv().await.unwrap();
        assert_eq!(second.event.event_name(), "extraction-complete");
        assert_eq!(second.meta.source, EventSource::Extract);
        assert_eq!(second.meta.correlation_id.as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        // Should not panic when nobody listens
        bus.emit_download(DownloadEvent::Cancelled {
            id: DownloadId::new("ignored"),
        });
        let none: Option<EventBus> = None;
        none.emit_download(DownloadEvent::Cancelled {
            id: DownloadId::new("ignored"),
        });
    }

    #[test]
    fn test_progress_wire_shape() {
        let event = AppEvent::Download(DownloadEvent::Progress {
            id: DownloadId::new("d1"),
            bytes_received: 400,
            total_bytes: Some(1000),
        });
        assert_eq!(event.event_name(), "download-progress");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["domain"], "download");
        assert_eq!(json["event"]["type"], "progress");
        assert_eq!(json["event"]["id"], "d1");
        assert_eq!(json["event"]["bytes_received"], 400);
    }

    #[test]
    fn test_failure_context_carries_kind() {
        let err: Error = NetworkError::HttpError {
            status: 404,
            message: "Not Found".into(),
        }
        .into();
        let failure = FailureContext::from_error(&err);
        assert_eq!(failure.kind, ErrorKind::PermanentTransfer);
        assert!(!failure.retryable);

        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "permanent_transfer");
    }

    #[test]
    fn test_message_correlates_download_events() {
        let message = EventMessage::from_event(AppEvent::Download(DownloadEvent::Cancelled {
            id: DownloadId::new("d7"),
        }));
        assert_eq!(message.meta.correlation_id.as_deref(), Some("d7"));
        assert_eq!(message.meta.source, EventSource::Download);

        let meta = serde_json::to_value(&message.meta).unwrap();
        assert_eq!(meta["source"], "download");
        assert_eq!(meta["level"], "info");
        assert_eq!(meta["correlationId"], "d7");
    }

    #[test]
    fn test_failure_levels() {
        let event = AppEvent::Update(UpdateEvent::Failed {
            stage: UpdateStage::Verify,
            failure: FailureContext::new(ErrorKind::ChecksumMismatch, "bad digest"),
        });
        assert_eq!(event.log_level(), tracing::Level::ERROR);
        assert_eq!(event.log_target(), "fetchup::events::update");
    }
}
