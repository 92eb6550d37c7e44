use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt::time::UtcTime, EnvFilter};

use nmap_gate::nmap::NmapFactory;
use nmap_gate::server::{self, AppState, ServerConfig};

/// nmap-gate — HTTP API that runs nmap scans and returns normalized JSON.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "nmap-gate",
    version,
    about = "HTTP API that runs nmap scans and returns normalized JSON.",
    long_about = None
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:5000")]
    bind: String,

    /// nmap executable, as a path or a name looked up on PATH.
    #[arg(long, default_value = "nmap")]
    nmap: String,

    /// Max concurrent scans; each worker keeps its own nmap handle.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Upper bound on a single scan, in seconds.
    #[arg(long = "timeout-secs", default_value_t = 600)]
    timeout_secs: u64,

    /// How long a request waits for a free worker before getting 503.
    #[arg(long = "queue-timeout-secs", default_value_t = 60)]
    queue_timeout_secs: u64,

    /// Prefix for scans that need root (OS detection). Empty to disable.
    #[arg(long = "elevate-with", default_value = "sudo -n")]
    elevate_with: String,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let config = ServerConfig {
        bind: cli.bind.clone(),
        workers: cli.workers.max(1),
        scan_timeout: Duration::from_secs(cli.timeout_secs),
        queue_timeout: Duration::from_secs(cli.queue_timeout_secs),
    };

    tracing::info!(
        bind = %config.bind,
        nmap = %cli.nmap,
        workers = config.workers,
        timeout_secs = cli.timeout_secs,
        queue_timeout_secs = cli.queue_timeout_secs,
        elevate_with = %cli.elevate_with,
        "nmap-gate configuration"
    );

    let factory = NmapFactory::new(cli.nmap, &cli.elevate_with);
    let state = AppState::new(&config, factory);

    let shutdown = CancellationToken::new();
    let on_ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl+C received, shutting down");
        on_ctrl_c.cancel();
    });

    server::serve(&config.bind, state, shutdown).await
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::new(Rfc3339))
        .init();
}
