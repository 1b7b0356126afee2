//! Generation worker - consumes the generation queue
//!
//! One logical consumer: requests are processed strictly one at a time,
//! with only the image fan-out inside a single itinerary running
//! concurrently.

use clap::Parser;
use itinerary_pipeline::infra::{Config, Metrics};
use itinerary_pipeline::io::{GeminiClient, ImageApiClient, QueueClient};
use itinerary_pipeline::services::{GenerateHandler, GenerateStage};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Generation stage worker
#[derive(Parser, Debug)]
#[command(name = "worker-generate", version, about)]
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
        queue = %config.generate_queue(),
        model = %config.textgen().model,
        "worker-generate starting"
    );

    let metrics = Arc::new(Metrics::new());
    let queue = Arc::new(QueueClient::new(&config, "worker-generate", metrics.clone()));

    let text = Arc::new(GeminiClient::from_config(config.textgen())?);
    let images = Arc::new(ImageApiClient::from_config(config.images())?);
    let stage = GenerateStage::new(text, images, config.images(), metrics.clone());
    let handler = GenerateHandler::new(stage, queue.clone(), config.validate_queue().to_string());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    queue.consume(config.generate_queue(), handler, shutdown_rx).await?;

    info!("worker-generate shutdown complete");
    Ok(())
}
