//! Integration tests for net crate

#[cfg(test)]
mod tests {
    use fetchup_errors::ErrorKind;
    use fetchup_net::*;
    use fetchup_types::DownloadId;
    use httpmock::prelude::*;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
    use tokio_util::sync::CancellationToken;

    fn body() -> Vec<u8> {
        (0..1000u32).map(|i| (i % 251) as u8).collect()
    }

    fn transport() -> HttpTransport {
        HttpTransport::new(
            NetClient::with_defaults().unwrap(),
            TransferConfig {
                idle_timeout: Duration::from_secs(5),
                progress_interval: Duration::from_millis(0),
                buffer_size: 1024,
            },
        )
    }

    fn request(url: String, dest: &Path, resume_offset: u64) -> TransferRequest {
        TransferRequest {
            task_id: DownloadId::new("d1"),
            url,
            destination: dest.to_path_buf(),
            headers: BTreeMap::new(),
            resume_offset,
        }
    }

    fn impatient_transport() -> HttpTransport {
        HttpTransport::new(
            NetClient::with_defaults().unwrap(),
            TransferConfig {
                idle_timeout: Duration::from_millis(300),
                progress_interval: Duration::from_millis(0),
                buffer_size: 1024,
            },
        )
    }

    /// Serve one connection with a hand-written response, then optionally stall
    async fn serve_raw(response: Vec<u8>, stall: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }
            socket.write_all(&response).await.unwrap();
            socket.flush().await.unwrap();
            if stall {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });
        format!("http://{addr}/file.bin")
    }

    fn drain(rx: &mut UnboundedReceiver<TransferProgress>) -> Vec<TransferProgress> {
        let mut out = Vec::new();
        while let Ok(p) = rx.try_recv() {
            out.push(p);
        }
        out
    }

    #[tokio::test]
    async fn full_transfer_writes_file_and_reports_total() {
        let server = MockServer::start();
        let data = body();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/file.bin");
            then.status(200).body(&data);
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("file.bin");
        let (tx, mut rx) = unbounded_channel();

        let outcome = transport()
            .transfer(
                request(server.url("/file.bin"), &dest, 0),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(
            outcome,
            TransferOutcome::Complete {
                bytes_received: 1000,
                total_bytes: Some(1000),
            }
        );
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);

        let updates = drain(&mut rx);
        assert!(!updates.is_empty());
        assert!(updates
            .windows(2)
            .all(|w| w[0].bytes_received <= w[1].bytes_received));
        assert_eq!(updates.last().unwrap().bytes_received, 1000);
    }

    #[tokio::test]
    async fn resume_sends_range_and_appends() {
        let server = MockServer::start();
        let data = body();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/file.bin").header("range", "bytes=400-");
            then.status(206)
                .header("content-range", "bytes 400-999/1000")
                .body(&data[400..]);
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("file.bin");
        tokio::fs::write(&dest, &data[..400]).await.unwrap();
        let (tx, mut rx) = unbounded_channel();

        let outcome = transport()
            .transfer(
                request(server.url("/file.bin"), &dest, 400),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(
            outcome,
            TransferOutcome::Complete {
                bytes_received: 1000,
                total_bytes: Some(1000),
            }
        );
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
        assert!(drain(&mut rx).iter().all(|p| p.bytes_received >= 400));
    }

    #[tokio::test]
    async fn resume_offset_is_clamped_to_partial_file() {
        let server = MockServer::start();
        let data = body();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/file.bin").header("range", "bytes=300-");
            then.status(206)
                .header("content-range", "bytes 300-999/1000")
                .body(&data[300..]);
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("file.bin");
        tokio::fs::write(&dest, &data[..300]).await.unwrap();
        let (tx, _rx) = unbounded_channel();

        transport()
            .transfer(
                request(server.url("/file.bin"), &dest, 400),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        mock.assert();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
    }

    #[tokio::test]
    async fn ignored_range_restarts_from_zero() {
        let server = MockServer::start();
        let data = body();
        server.mock(|when, then| {
            when.method(GET).path("/file.bin");
            then.status(200).body(&data);
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("file.bin");
        tokio::fs::write(&dest, vec![0xFFu8; 400]).await.unwrap();
        let (tx, mut rx) = unbounded_channel();

        let outcome = transport()
            .transfer(
                request(server.url("/file.bin"), &dest, 400),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            TransferOutcome::Complete {
                bytes_received: 1000,
                ..
            }
        ));
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
        assert_eq!(drain(&mut rx).first().unwrap().bytes_received, 0);
    }

    #[tokio::test]
    async fn client_error_is_permanent() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404).body("Not Found");
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("missing.bin");
        let (tx, _rx) = unbounded_channel();

        let err = transport()
            .transfer(
                request(server.url("/missing"), &dest, 0),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.task_id.as_str(), "d1");
        assert_eq!(err.error.kind(), ErrorKind::PermanentTransfer);
        assert_eq!(err.bytes_persisted, 0);
        assert!(!retry::is_transient(&err.error));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(503);
        });

        let temp = tempdir().unwrap();
        let (tx, _rx) = unbounded_channel();

        let err = transport()
            .transfer(
                request(server.url("/flaky"), &temp.path().join("f"), 0),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.error.kind(), ErrorKind::TransientTransfer);
    }

    #[tokio::test]
    async fn unanswered_request_times_out_as_transient() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/stuck");
            then.status(200)
                .delay(Duration::from_secs(3))
                .body("late");
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("stuck.bin");
        tokio::fs::write(&dest, b"partial").await.unwrap();
        let (tx, _rx) = unbounded_channel();

        let err = impatient_transport()
            .transfer(
                request(server.url("/stuck"), &dest, 7),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.error.kind(), ErrorKind::TransientTransfer);
        assert!(retry::is_transient(&err.error));
        assert_eq!(err.bytes_persisted, 7);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"partial");
    }

    #[tokio::test]
    async fn stalled_body_times_out_and_keeps_received_bytes() {
        let data = body();
        let mut response =
            b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nContent-Type: application/octet-stream\r\n\r\n"
                .to_vec();
        response.extend_from_slice(&data[..400]);
        let url = serve_raw(response, true).await;

        let temp = tempdir().unwrap();
        let dest = temp.path().join("file.bin");
        let (tx, _rx) = unbounded_channel();

        let err = impatient_transport()
            .transfer(request(url, &dest, 0), tx, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.error.kind(), ErrorKind::TransientTransfer);
        assert!(retry::is_transient(&err.error));
        assert_eq!(err.bytes_persisted, 400);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), &data[..400]);
    }

    #[tokio::test]
    async fn unsatisfiable_range_restarts_and_truncates() {
        let server = MockServer::start();
        let data = body();
        let smaller = data[..300].to_vec();
        let rejected = server.mock(|when, then| {
            when.method(GET).path("/file.bin").header("range", "bytes=400-");
            then.status(416).header("content-range", "bytes */300");
        });
        let fresh = server.mock(|when, then| {
            when.method(GET).path("/file.bin");
            then.status(200).body(&smaller);
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("file.bin");
        tokio::fs::write(&dest, vec![0xFFu8; 400]).await.unwrap();
        let (tx, mut rx) = unbounded_channel();

        let outcome = transport()
            .transfer(
                request(server.url("/file.bin"), &dest, 400),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        rejected.assert_hits(1);
        fresh.assert_hits(1);
        assert_eq!(
            outcome,
            TransferOutcome::Complete {
                bytes_received: 300,
                total_bytes: Some(300),
            }
        );
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), smaller);
        assert_eq!(drain(&mut rx).first().unwrap().bytes_received, 0);
    }

    #[tokio::test]
    async fn unsatisfiable_range_on_full_file_is_complete() {
        let server = MockServer::start();
        let data = body();
        let rejected = server.mock(|when, then| {
            when.method(GET).path("/file.bin").header("range", "bytes=1000-");
            then.status(416).header("content-range", "bytes */1000");
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("file.bin");
        tokio::fs::write(&dest, &data).await.unwrap();
        let (tx, mut rx) = unbounded_channel();

        let outcome = transport()
            .transfer(
                request(server.url("/file.bin"), &dest, 1000),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap();

        rejected.assert_hits(1);
        assert_eq!(
            outcome,
            TransferOutcome::Complete {
                bytes_received: 1000,
                total_bytes: Some(1000),
            }
        );
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
        let updates = drain(&mut rx);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].total_bytes, Some(1000));
    }

    #[tokio::test]
    async fn missing_content_length_reports_unknown_total() {
        let mut response =
            b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Type: application/octet-stream\r\n\r\n"
                .to_vec();
        response.extend_from_slice(&body());
        let url = serve_raw(response, false).await;

        let temp = tempdir().unwrap();
        let dest = temp.path().join("file.bin");
        let (tx, mut rx) = unbounded_channel();

        let outcome = transport()
            .transfer(request(url, &dest, 0), tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TransferOutcome::Complete {
                bytes_received: 1000,
                total_bytes: None,
            }
        );
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), body());
        let updates = drain(&mut rx);
        assert!(!updates.is_empty());
        assert!(updates.iter().all(|p| p.total_bytes.is_none()));
    }

    #[tokio::test]
    async fn request_headers_are_forwarded() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/private")
                .header("authorization", "Bearer token");
            then.status(200).body("secret");
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("private.txt");
        let mut req = request(server.url("/private"), &dest, 0);
        req.headers
            .insert("authorization".into(), "Bearer token".into());
        let (tx, _rx) = unbounded_channel();

        transport()
            .transfer(req, tx, CancellationToken::new())
            .await
            .unwrap();

        mock.assert();
        assert_eq!(tokio::fs::read_to_string(&dest).await.unwrap(), "secret");
    }

    #[tokio::test]
    async fn cancellation_interrupts_waiting_request() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200)
                .delay(Duration::from_secs(10))
                .body("late");
        });

        let temp = tempdir().unwrap();
        let dest = temp.path().join("slow.bin");
        tokio::fs::write(&dest, b"partial").await.unwrap();
        let (tx, _rx) = unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = transport()
            .transfer(request(server.url("/slow"), &dest, 7), tx, cancel)
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Interrupted { bytes_received: 7 });
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"partial");
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected() {
        let temp = tempdir().unwrap();
        let (tx, _rx) = unbounded_channel();

        let err = transport()
            .transfer(
                request("ftp://example.com/a.zip".into(), &temp.path().join("a"), 0),
                tx,
                CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.error.kind(), ErrorKind::PermanentTransfer);
    }

    #[tokio::test]
    async fn fetch_json_decodes_manifest() {
        #[derive(serde::Deserialize)]
        struct Manifest {
            version: String,
        }

        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/latest.json");
            then.status(200).body(r#"{"version":"2.0.0"}"#);
        });

        let client = NetClient::with_defaults().unwrap();
        let manifest: Manifest = fetch_json(&client, &server.url("/latest.json"))
            .await
            .unwrap();
        assert_eq!(manifest.version, "2.0.0");
    }
}
