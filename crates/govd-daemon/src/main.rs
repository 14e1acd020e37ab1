//! govd-daemon — update governance daemon.
//!
//! Hosts the governance service as a standalone process: loads the TOML
//! configuration, starts the background tickers, and waits for SIGINT or
//! SIGTERM before shutting down gracefully. The update executor wired in
//! here is the logging stub; a deployment embeds this crate as a library and
//! supplies the real one.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use govd_core::{GovernanceConfig, SystemTimeSource};
use govd_daemon::executor::StubUpdateExecutor;
use govd_daemon::service::GovernanceService;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// govd daemon - update request governance service
#[derive(Parser, Debug)]
#[command(name = "govd-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the governance configuration file
    #[arg(short, long, default_value = "govd.toml")]
    config: PathBuf,

    /// Log level when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = if args.config.exists() {
        GovernanceConfig::from_file(&args.config)
            .with_context(|| format!("loading config from {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "config file not found, using defaults");
        GovernanceConfig::default()
    };

    let service = GovernanceService::new(
        config,
        Arc::new(StubUpdateExecutor),
        Arc::new(SystemTimeSource),
    )
    .context("constructing governance service")?;
    service.start();

    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
    }

    service.shutdown().await;
    Ok(())
}
