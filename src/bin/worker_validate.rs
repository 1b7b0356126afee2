//! Validation worker - consumes the validation queue
//!
//! Waypoint lookups run sequentially to respect place-provider rate limits.

use clap::Parser;
use itinerary_pipeline::infra::{Config, Metrics};
use itinerary_pipeline::io::{PlacesApiClient, QueueClient};
use itinerary_pipeline::services::{ValidateHandler, ValidateStage};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Validation stage worker
#[derive(Parser, Debug)]
#[command(name = "worker-validate", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load(&Config::resolve_config_path(args.config.as_deref()));

    info!(
        config_file = %config.config_file(),
        queue = %config.validate_queue(),
        "worker-validate starting"
    );

    let metrics = Arc::new(Metrics::new());
    let queue = Arc::new(QueueClient::new(&config, "worker-validate", metrics.clone()));

    let places = Arc::new(PlacesApiClient::from_config(config.places())?);
    let stage = ValidateStage::new(places, metrics.clone());
    let handler = ValidateHandler::new(stage, queue.clone(), config.complete_queue().to_string());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    queue.consume(config.validate_queue(), handler, shutdown_rx).await?;

    info!("worker-validate shutdown complete");
    Ok(())
}
