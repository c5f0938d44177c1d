//! Roundcore engine binary
//!
//! Runs the game loops in-process until Ctrl-C.

use clap::Parser;
use roundcore::{ConfigLoader, GameRuntime};
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "roundcore")]
#[command(about = "Round lifecycle and settlement engine", long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "roundcore=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .init();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    info!("Starting roundcore");
    info!("   Min bet: {}", config.wallet.min_bet);
    info!(
        "   Aviator: tick {}ms, +{} per tick, {}ms between rounds",
        config.aviator.tick_interval_ms, config.aviator.increment, config.aviator.round_gap_ms
    );
    info!("   Color: {}ms rounds", config.color.round_duration_ms);

    let runtime = GameRuntime::new(config);
    runtime.start().await;

    if let Err(e) = signal::ctrl_c().await {
        error!("failed to listen for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C signal, shutting down");
    runtime.shutdown().await;

    Ok(())
}
