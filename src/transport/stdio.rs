//! Stdio transport: newline-delimited JSON on standard streams.
//!
//! One logical session per process. The reader buffers partial lines
//! until a terminator arrives; each complete frame is dispatched on its
//! own task so a slow handler never stalls the reader. Responses funnel
//! through a single writer task, so concurrent requests cannot
//! interleave bytes on standard output.
//!
//! This transport MUST NOT log to standard output; all diagnostics go
//! to standard error via `tracing`.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::server::{RequestContext, Server};
use crate::transport::TransportCounters;

/// Outbound channel depth before dispatch tasks back-pressure.
const WRITE_QUEUE_DEPTH: usize = 256;

/// Stdio transport bound to a server.
pub struct StdioTransport {
    server: Server,
    counters: Arc<TransportCounters>,
}

impl StdioTransport {
    /// Creates the transport, sharing the server's counters.
    #[must_use]
    pub fn new(server: Server) -> Self {
        let counters = server.transport_counters();
        Self { server, counters }
    }

    /// Runs the read loop until EOF or shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if reading standard input fails.
    pub async fn run(&self) -> std::io::Result<()> {
        let mut reader = BufReader::new(tokio::io::stdin());
        let mut shutdown = self.server.shutdown_signal();

        let (write_tx, write_rx) = mpsc::channel::<String>(WRITE_QUEUE_DEPTH);
        let writer = tokio::spawn(Self::write_loop(write_rx, Arc::clone(&self.counters)));

        self.counters.connection_opened();
        info!("stdio transport ready");

        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                read = reader.read_line(&mut line) => read?,
                _ = shutdown.changed() => {
                    debug!("stdio transport observed shutdown");
                    break;
                }
            };

            if read == 0 {
                // EOF: client closed the connection.
                info!("stdin closed, shutting down stdio transport");
                break;
            }
            self.counters.add_bytes_in(read as u64);

            let frame = line.trim();
            if frame.is_empty() {
                continue;
            }

            let server = self.server.clone();
            let frame = frame.to_string();
            let write_tx = write_tx.clone();
            tokio::spawn(async move {
                let handled = server.handle_message(&RequestContext::stdio(), &frame).await;
                let Some(message) = handled.message else {
                    return;
                };
                match serde_json::to_string(&message) {
                    Ok(serialised) => {
                        // The receiver only disappears at shutdown.
                        let _ = write_tx.send(serialised).await;
                    }
                    Err(e) => error!(error = %e, "failed to serialise response"),
                }
            });
        }

        self.counters.connection_closed();
        drop(write_tx);
        let _ = writer.await;
        Ok(())
    }

    /// Serialises all outbound frames onto stdout.
    async fn write_loop(mut rx: mpsc::Receiver<String>, counters: Arc<TransportCounters>) {
        let mut stdout = tokio::io::stdout();
        while let Some(frame) = rx.recv().await {
            let written = frame.len() as u64 + 1;
            let result = async {
                stdout.write_all(frame.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await
            }
            .await;

            match result {
                Ok(()) => counters.add_bytes_out(written),
                Err(e) => {
                    counters.record_error(format!("stdout write failed: {e}"));
                    error!(error = %e, "failed to write response");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn transport_shares_server_counters() {
        let server = Server::new(Config::default()).unwrap();
        let transport = StdioTransport::new(server.clone());

        transport.counters.add_bytes_in(42);
        assert_eq!(server.health().transport.bytes_in, 42);
    }
}
