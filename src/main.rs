//! mcp-gateway: multi-transport MCP server for AI agent platforms
//!
//! Exposes a tool catalog to language-model clients over stdio or HTTP
//! with per-session rate limiting, circuit breaking, and token-budget
//! tool gating. Configuration lives in a JSON file; every section has
//! working defaults, so the server runs with no file at all.

use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use mcp_gateway::config::{self, TransportKind};
use mcp_gateway::server::Server;
use mcp_gateway::transport::{http, stdio::StdioTransport};

/// Multi-transport MCP server with admission control.
///
/// Serves a tool catalog to language-model clients over stdio (one
/// session per process) or HTTP (multi-session). Sessions are rate
/// limited and circuit broken individually; discovery and gating keep
/// tool provisioning inside a client's token budget.
#[derive(Parser, Debug)]
#[command(name = "mcp-gateway")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<std::path::PathBuf>,

    /// Transport to bind, overriding the configuration file
    #[arg(short, long, value_enum)]
    transport: Option<TransportArg>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TransportArg {
    /// Newline-delimited JSON on standard streams.
    Stdio,
    /// JSON-RPC over HTTP POST.
    Http,
}

impl From<TransportArg> for TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Stdio => Self::Stdio,
            TransportArg::Http => Self::Http,
        }
    }
}

/// Determines the log level from CLI arguments.
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber.
///
/// Logs always go to standard error; on the stdio transport, standard
/// output carries only protocol frames.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Waits for SIGINT or SIGTERM.
async fn shutdown_signals() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}

async fn run(args: Args) -> Result<(), String> {
    let mut cfg =
        config::load_config(args.config.as_deref()).map_err(|e| format!("configuration: {e}"))?;

    if let Some(transport) = args.transport {
        cfg.transport.kind = transport.into();
    }
    let kind = cfg.transport.kind;

    let server = Server::new(cfg).map_err(|e| format!("configuration: {e}"))?;
    server.start().map_err(|e| e.to_string())?;

    // Signals begin the drain; the transports observe the shutdown
    // signal and wind down their accept loops.
    let signal_server = server.clone();
    tokio::spawn(async move {
        shutdown_signals().await;
        if signal_server.is_running() {
            if let Err(e) = signal_server.stop().await {
                error!(error = %e, "shutdown failed");
            }
        }
    });

    let transport_result = match kind {
        TransportKind::Stdio => {
            info!("serving on stdio transport");
            StdioTransport::new(server.clone())
                .run()
                .await
                .map_err(|e| format!("stdio transport: {e}"))
        }
        TransportKind::Http => http::serve(server.clone())
            .await
            .map_err(|e| format!("http transport: {e}")),
    };

    if server.is_running() {
        server.stop().await.map_err(|e| e.to_string())?;
    }

    transport_result
}

/// Entry point for the mcp-gateway server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration first to get the log level.
    let config_level = config::load_config(args.config.as_deref())
        .map(|cfg| cfg.logging.level)
        .unwrap_or_else(|_| "warn".to_string());
    let log_level = get_log_level(args.verbose, args.quiet, &config_level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting mcp-gateway server"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => {
            info!("server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "server error");
            ExitCode::FAILURE
        }
    }
}
