//! Persistence worker - consumes the completion queue
//!
//! Inserts one storage row per validated itinerary and publishes the ready
//! event for the server to broadcast.

use clap::Parser;
use itinerary_pipeline::infra::{Config, Metrics};
use itinerary_pipeline::io::{QueueClient, RestStore};
use itinerary_pipeline::services::{PersistHandler, PersistStage};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Persistence stage worker
#[derive(Parser, Debug)]
#[command(name = "worker-persist", version, about)]
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
        queue = %config.complete_queue(),
        table = %config.storage().table,
        "worker-persist starting"
    );

    let metrics = Arc::new(Metrics::new());
    let queue = Arc::new(QueueClient::new(&config, "worker-persist", metrics.clone()));

    let store = Arc::new(RestStore::from_config(config.storage())?);
    let stage = PersistStage::new(store, metrics.clone());
    let handler = PersistHandler::new(stage, queue.clone(), config.ready_topic().to_string());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    queue.consume(config.complete_queue(), handler, shutdown_rx).await?;

    info!("worker-persist shutdown complete");
    Ok(())
}
