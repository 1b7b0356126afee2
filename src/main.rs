//! Pipeline server - intake, notification hub, and ready-event fan-out
//!
//! Runs everything except the three queue workers:
//! - optional embedded MQTT broker (development setups)
//! - HTTP intake endpoint (`POST /itineraries`) and Prometheus metrics
//! - notification hub (TCP broadcast server)
//! - transient consumer bridging the ready topic onto the hub
//!
//! Module structure:
//! - `domain/` - Request, itinerary, and queue payload types
//! - `io/` - External interfaces (queue, providers, storage, HTTP, notify)
//! - `services/` - Pipeline stages (generate, validate, persist)
//! - `infra/` - Infrastructure (config, backoff, errors, metrics, broker)

use clap::Parser;
use itinerary_pipeline::infra::{Config, Metrics};
use itinerary_pipeline::io::{NotifyHub, QueueClient, ReadyBroadcaster};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Itinerary pipeline server
#[derive(Parser, Debug)]
#[command(name = "pipeline-server", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Structured logging, level configurable via RUST_LOG (default INFO)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("pipeline-server starting");

    let args = Args::parse();
    let config = Config::load(&Config::resolve_config_path(args.config.as_deref()));

    info!(
        config_file = %config.config_file(),
        broker_host = %config.broker_host(),
        broker_port = %config.broker_port(),
        embedded = %config.broker_embedded(),
        http_port = %config.http_port(),
        notify_port = %config.notify_port(),
        generate_queue = %config.generate_queue(),
        ready_topic = %config.ready_topic(),
        "config_loaded"
    );

    if config.broker_embedded() {
        itinerary_pipeline::infra::broker::start_embedded_broker(&config);
    }

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let queue = Arc::new(QueueClient::new(&config, "pipeline-server", metrics.clone()));

    // Notification hub
    let hub = NotifyHub::new(metrics.clone());
    let notify_listener =
        TcpListener::bind(("0.0.0.0", config.notify_port())).await?;
    {
        let hub = hub.clone();
        let hub_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            hub.serve(notify_listener, hub_shutdown).await;
        });
    }

    // Bridge ready events from the broker onto the hub
    {
        let queue = queue.clone();
        let broadcaster = ReadyBroadcaster::new(hub.clone());
        let ready_topic = config.ready_topic().to_string();
        let ready_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.consume_transient(&ready_topic, broadcaster, ready_shutdown).await
            {
                tracing::error!(error = %e, "ready_listener_error");
            }
        });
    }

    // HTTP intake + metrics endpoint
    {
        let queue = queue.clone();
        let metrics = metrics.clone();
        let http_port = config.http_port();
        let generate_queue = config.generate_queue().to_string();
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = itinerary_pipeline::io::http::start_http_server(
                http_port,
                queue,
                generate_queue,
                metrics,
                http_shutdown,
            )
            .await
            {
                tracing::error!(error = %e, "http_server_error");
            }
        });
    }

    // Periodic metrics summary
    {
        let metrics = metrics.clone();
        let interval_secs = config.metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                metrics.report().log();
            }
        });
    }

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Park until shutdown
    let mut shutdown = shutdown_rx;
    while shutdown.changed().await.is_ok() {
        if *shutdown.borrow() {
            break;
        }
    }

    info!("pipeline-server shutdown complete");
    Ok(())
}
