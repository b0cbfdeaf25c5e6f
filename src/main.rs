//! DB Tool Server - Main entry point.
//!
//! Serves tool calls over newline-delimited JSON-RPC on stdin/stdout.
//! Stdout carries protocol traffic only, so logs go to stderr.

use db_tool_server::config::Config;
use db_tool_server::server::Server;
use db_tool_server::transport::{StdioTransport, Transport, wait_for_signal};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    if !config.enable_logs {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Initialize logging
    init_tracing(&config);

    if let Err(message) = config.validate() {
        eprintln!("Error: {}", message);
        eprintln!();
        eprintln!("Usage: db-tool-server --database <path> [--writable] [--pool-size N]");
        eprintln!();
        eprintln!("Examples:");
        eprintln!("  db-tool-server --database data.db");
        eprintln!("  db-tool-server --database sqlite:data.db --pool-size 4 --max-overflow 2");
        eprintln!("  db-tool-server --database data.db --metrics --metrics-port 9090");
        std::process::exit(1);
    }

    info!(
        database = %config.database,
        pool_size = config.pool_size,
        max_overflow = config.max_overflow,
        "Starting DB Tool Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let server = Server::from_config(&config)?;

    if config.metrics_enabled {
        let exporter = server.metrics_exporter(config.metrics_bind_addr());
        let listener = exporter.bind().await?;
        tokio::spawn(async move {
            if let Err(e) = exporter.serve(listener, wait_for_signal()).await {
                warn!(error = %e, "Metrics endpoint stopped");
            }
        });
    }

    let transport = StdioTransport::new(Arc::clone(server.dispatcher()));
    info!(transport = transport.name(), "Transport ready");

    if let Err(e) = transport.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
