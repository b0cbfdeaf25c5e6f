//! Stdio transport.
//!
//! Envelopes are read one line at a time, in order, so session state changes
//! happen in the order the client sent them. Tool calls are spawned as they
//! arrive and a single writer task emits responses as they complete, so a
//! slow call never holds up the ones behind it. At end of input the session
//! is closed and in-flight calls are drained before returning.

use crate::error::{DbError, DbResult};
use crate::mcp::dispatcher::{Dispatch, Dispatcher};
use crate::mcp::protocol::Response;
use crate::transport::{Transport, wait_for_signal};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Stdio transport implementation.
///
/// This transport reads JSON-RPC messages from stdin and writes
/// responses to stdout. Logs go to stderr.
pub struct StdioTransport {
    dispatcher: Arc<Dispatcher>,
}

impl StdioTransport {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!(tools = self.dispatcher.registry().len(), "Starting tool server on stdio");

        let shutdown_requested = tokio::select! {
            result = serve(Arc::clone(&self.dispatcher), tokio::io::stdin(), tokio::io::stdout()) => {
                result?;
                info!("Input closed, stdio transport completed");
                false
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received");
                true
            }
        };

        info!("Closing connection pool");
        self.dispatcher.context().pool().close();

        if shutdown_requested {
            // tokio::select! cannot interrupt a blocking stdin read
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}

/// Serve one session over any line-oriented byte stream pair.
pub async fn serve<R, W>(dispatcher: Arc<Dispatcher>, reader: R, writer: W) -> DbResult<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Response>();
    let writer_task = tokio::spawn(write_responses(writer, rx));

    let mut session = dispatcher.session();
    let mut lines = BufReader::new(reader).lines();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| DbError::internal(format!("Failed to read input: {}", e)))?
    {
        if line.trim().is_empty() {
            continue;
        }
        match session.dispatch_line(&line) {
            Dispatch::Reply(response) => {
                let _ = tx.send(response);
            }
            Dispatch::Pending(call) => {
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let _ = tx.send(call.await);
                });
            }
            Dispatch::Silent => {}
        }
        while let Some(joined) = in_flight.try_join_next() {
            log_join(joined);
        }
    }

    session.close();
    while let Some(joined) = in_flight.join_next().await {
        log_join(joined);
    }
    drop(tx);

    writer_task
        .await
        .map_err(|e| DbError::internal(format!("Response writer failed: {}", e)))?
        .map_err(|e| DbError::internal(format!("Failed to write output: {}", e)))
}

async fn write_responses<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<Response>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        let mut line = response.to_line();
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(error = %e, "Call task panicked");
        } else {
            warn!(error = %e, "Call task cancelled");
        }
    }
}
