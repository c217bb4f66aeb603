//! JSON-lines request loop
//!
//! Each stdin line is one request. Requests run concurrently, so a pause can
//! overtake a long `download-update`. Responses and bus events share a single
//! stdout writer and never interleave within a line.

use crate::error::CliError;
use fetchup_ops::wire::{Outbound, Request, Response, WireEvent};
use fetchup_ops::OpsCtx;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub async fn run(ctx: OpsCtx) -> Result<(), CliError> {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
    let writer = tokio::spawn(write_lines(out_rx));

    let mut subscription = ctx.events.subscribe();
    let subscriber = subscription.id();
    let event_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(message) = subscription.recv().await {
            let event = WireEvent::from_message(&message);
            if event_tx.send(Outbound::Event(event)).is_err() {
                break;
            }
        }
    });

    info!("serving requests on stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut requests = JoinSet::new();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                None
            }
        };
        let Some(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request = match Request::parse(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "rejected request line");
                let _ = out_tx.send(Outbound::Response(Response::from_result(None, Err(e))));
                continue;
            }
        };
        debug!(id = request.id, command = %request.command, "request received");

        let ctx = ctx.clone();
        let tx = out_tx.clone();
        requests.spawn(async move {
            let result = match request.command() {
                Ok(command) => fetchup_ops::execute(&ctx, command).await,
                Err(e) => Err(e),
            };
            let _ = tx.send(Outbound::Response(Response::from_result(
                Some(request.id),
                result,
            )));
        });
    }

    // Pausing releases any request still waiting on a download
    info!("input closed, shutting down");
    if let Err(e) = ctx.shutdown().await {
        warn!(error = %e, "download manager was already stopped");
    }
    while requests.join_next().await.is_some() {}

    ctx.events.unsubscribe(subscriber);
    let _ = forwarder.await;
    drop(out_tx);
    let _ = writer.await;
    Ok(())
}

async fn write_lines(mut out_rx: mpsc::UnboundedReceiver<Outbound>) {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = out_rx.recv().await {
        let mut line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "failed to encode outbound message");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            error!(error = %e, "stdout closed");
            break;
        }
        let _ = stdout.flush().await;
    }
}
