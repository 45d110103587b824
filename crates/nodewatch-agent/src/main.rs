//! nodewatch-agent - per-node telemetry agent.
//!
//! Samples CPU and GPU load and streams it to a nodewatch collector.

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use nodewatch_agent::link::LinkConfig;
use nodewatch_agent::{Agent, AgentConfig, NoGpu, NvidiaDetector, SystemSampler, sample_once};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "nodewatch-agent")]
#[command(about = "Streams CPU/GPU telemetry to a nodewatch collector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Report under this host name instead of the machine's
    #[arg(long, env = "NODEWATCH_HOST_NAME", global = true)]
    host_name: Option<String>,

    /// Do not query nvidia-smi
    #[arg(long, global = true)]
    no_gpu: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream reports to the collector
    Run {
        /// Collector address, host:port or ws:// URL
        #[arg(long, env = "NODEWATCH_SERVER")]
        server: String,

        /// Shared key
        #[arg(long, env = "NODEWATCH_KEY", default_value = "123456", hide_env_values = true)]
        key: String,

        /// Milliseconds between reports
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,

        /// Seconds without a reply before reconnecting
        #[arg(long, default_value_t = 5)]
        receive_timeout_secs: u64,
    },

    /// Print one report as JSON and exit
    Sample,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Run {
            server,
            key,
            interval_ms,
            receive_timeout_secs,
        } => {
            let mut config = AgentConfig::new(server)
                .with_key(key)
                .with_gpus(!cli.no_gpu)
                .with_link(
                    LinkConfig::default()
                        .with_send_interval(Duration::from_millis(interval_ms))
                        .with_receive_timeout(Duration::from_secs(receive_timeout_secs)),
                );
            if let Some(name) = cli.host_name {
                config = config.with_host_name(name);
            }

            let agent = Agent::from_config(&config)?;
            info!(server = %config.server, interval = ?config.link.send_interval, "Starting nodewatch agent");

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                signal_cancel.cancel();
            });

            agent.run(cancel).await;
        }

        Commands::Sample => {
            let gpus: Box<dyn nodewatch_agent::GpuDetector> = if cli.no_gpu {
                Box::new(NoGpu)
            } else {
                Box::new(NvidiaDetector::new())
            };
            let sampler = match cli.host_name {
                Some(name) => SystemSampler::with_host_name(name, gpus),
                None => SystemSampler::new(gpus),
            };
            let report = sample_once(sampler).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("nodewatch_agent=info"));
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
