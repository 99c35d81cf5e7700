//! Dispatcher service binary
//!
//! Usage:
//!   dispatcher --config config/dispatcher.toml
//!   dispatcher --config config/dispatcher.toml --check-config
//!   dispatcher --socket /tmp/dispatch.sock --log-level debug --json-logs

use anyhow::{Context, Result};
use clap::Parser;
use dispatch_config::DispatchConfig;
use dispatcher::{socket_engine, DispatchService};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dispatcher")]
#[command(about = "Edge-to-engine request dispatcher")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "DISPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Override the listening socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = DispatchConfig::load(args.config.as_deref())
        .context("Failed to load dispatcher configuration")?;
    if let Some(socket) = &args.socket {
        config.server.socket_path = socket.clone();
    }

    init_logging(&args, &config)?;

    if args.check_config {
        info!(config = ?config, "Configuration is valid");
        return Ok(());
    }

    info!(
        socket = %config.server.socket_path.display(),
        engines = config.engine.socket_paths.len(),
        "Starting dispatcher"
    );

    let engine = socket_engine(&config);
    let service = DispatchService::new(config, engine).context("Failed to start event lanes")?;

    if let Err(e) = service.run(shutdown_signal()).await {
        error!(error = %e, "Dispatcher exited with error");
        return Err(e);
    }

    Ok(())
}

fn init_logging(args: &Args, config: &DispatchConfig) -> Result<()> {
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    if args.json_logs || config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
