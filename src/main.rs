//! Main entry point for the github-ingest CLI

use clap::Parser;
use github_ingest::cli::Cli;
use github_ingest::metrics;
use github_ingest::shutdown::ShutdownCoordinator;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("github_ingest=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
    }

    let shutdown = ShutdownCoordinator::shared();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received - finishing the current unit of work and saving progress...");
                shutdown.request_shutdown();
            }
        }
    });

    if let Err(e) = cli.execute(shutdown).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}
