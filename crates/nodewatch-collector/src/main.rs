//! nodewatch-collector - central telemetry collector.
//!
//! Accepts agent WebSocket connections on `/ws` and serves the node listing
//! and device query API.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use nodewatch_collector::{CollectorConfig, CollectorServer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "nodewatch-collector")]
#[command(about = "Collects CPU/GPU telemetry from nodewatch agents")]
#[command(version)]
struct Cli {
    /// Address to listen on
    #[arg(long, env = "NODEWATCH_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Comma-separated shared keys agents may connect with
    #[arg(long, env = "NODEWATCH_KEYS", value_delimiter = ',', default_value = "123456")]
    keys: Vec<String>,

    /// Seconds of history retained per node
    #[arg(long, default_value_t = 10)]
    retention_secs: u64,

    /// Seconds of silence before a node is marked offline
    #[arg(long, default_value_t = 10)]
    stale_secs: u64,

    /// Seconds between liveness sweeps
    #[arg(long, default_value_t = 2)]
    sweep_secs: u64,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = CollectorConfig::new(cli.bind)
        .with_keys(cli.keys)
        .with_retention(Duration::from_secs(cli.retention_secs))
        .with_stale_timeout(Duration::from_secs(cli.stale_secs))
        .with_sweep_interval(Duration::from_secs(cli.sweep_secs));
    config.validate()?;

    info!(
        bind = %config.bind_addr,
        keys = config.valid_keys.len(),
        retention = ?config.retention,
        stale_timeout = ?config.stale_timeout,
        "Starting nodewatch collector"
    );
    info!("  Agents connect via: ws://{}/ws?key=<key>", config.bind_addr);

    let server = CollectorServer::new(config);
    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        error!(error = %e, "Collector failed");
        return Err(e.into());
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nodewatch_collector=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer()).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
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
        () = ctrl_c => info!("Received SIGINT (Ctrl+C)"),
        () = terminate => info!("Received SIGTERM"),
    }
}
