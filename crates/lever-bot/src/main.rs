//! Leveraged trading core - entry point.
//!
//! Paper-mode runner: a simulated exchange, the market data feed, the
//! execution engine, the position ledger and the cycle orchestrator,
//! driven by decision files dropped by an external decision layer.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Cycle-based leveraged trading core (paper mode)
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via LEVER_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    lever_bot::init_logging()?;

    info!("Starting lever-bot v{}", env!("CARGO_PKG_VERSION"));

    // Determine config path: CLI arg > LEVER_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("LEVER_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = if std::path::Path::new(&config_path).exists() {
        lever_bot::AppConfig::from_file(&config_path)?
    } else {
        tracing::warn!(path = %config_path, "Config file not found, using defaults");
        lever_bot::AppConfig::default()
    };
    info!(instruments = ?config.instruments, "Configuration loaded");

    let app = lever_bot::Application::new(config);

    // Ctrl-C cancels the shared shutdown token.
    let shutdown = app.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            shutdown.cancel();
        }
    });

    app.run().await?;

    Ok(())
}
