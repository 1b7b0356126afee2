//! HTTP intake and metrics endpoint
//!
//! Uses hyper for the HTTP server:
//! - `POST /itineraries` - accept a generation request, stamp a request id,
//!   enqueue it, and answer `{"status":"processing"}` immediately
//! - `GET /health` - liveness probe
//! - `GET /metrics` - pipeline counters in Prometheus text format

use crate::domain::request::{new_request_id, GenerationJob};
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::io::queue::QueueClient;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric in text exposition format
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Format all pipeline counters in Prometheus text exposition format
fn format_prometheus_metrics(summary: &MetricsSummary) -> String {
    let mut output = String::with_capacity(2048);

    write_metric(
        &mut output,
        "pipeline_intake_requests_total",
        "Generation requests accepted at intake",
        MetricType::Counter,
        summary.intake_requests,
    );
    write_metric(
        &mut output,
        "pipeline_jobs_consumed_total",
        "Queue messages delivered to handlers",
        MetricType::Counter,
        summary.jobs_consumed,
    );
    write_metric(
        &mut output,
        "pipeline_jobs_acked_total",
        "Queue messages acknowledged",
        MetricType::Counter,
        summary.jobs_acked,
    );
    write_metric(
        &mut output,
        "pipeline_jobs_requeued_total",
        "Queue messages requeued after handler failure",
        MetricType::Counter,
        summary.jobs_requeued,
    );
    write_metric(
        &mut output,
        "pipeline_jobs_dead_lettered_total",
        "Queue messages parked after exhausting redeliveries",
        MetricType::Counter,
        summary.jobs_dead_lettered,
    );
    write_metric(
        &mut output,
        "pipeline_broker_reconnects_total",
        "Broker reconnect attempts",
        MetricType::Counter,
        summary.broker_reconnects,
    );
    write_metric(
        &mut output,
        "pipeline_images_generated_total",
        "Images produced by the provider",
        MetricType::Counter,
        summary.images_generated,
    );
    write_metric(
        &mut output,
        "pipeline_image_fallbacks_total",
        "Image calls retried with the generic prompt",
        MetricType::Counter,
        summary.image_fallbacks,
    );
    write_metric(
        &mut output,
        "pipeline_image_placeholders_total",
        "Images substituted with the placeholder URL",
        MetricType::Counter,
        summary.image_placeholders,
    );
    write_metric(
        &mut output,
        "pipeline_waypoints_resolved_total",
        "Waypoints corrected via place lookup",
        MetricType::Counter,
        summary.waypoints_resolved,
    );
    write_metric(
        &mut output,
        "pipeline_waypoints_passed_through_total",
        "Waypoints forwarded unmodified after failed lookup",
        MetricType::Counter,
        summary.waypoints_passed_through,
    );
    write_metric(
        &mut output,
        "pipeline_itineraries_persisted_total",
        "Itinerary rows written to storage",
        MetricType::Counter,
        summary.itineraries_persisted,
    );
    write_metric(
        &mut output,
        "pipeline_duplicate_deliveries_total",
        "Redeliveries deduplicated by the request-id guard",
        MetricType::Counter,
        summary.duplicate_deliveries,
    );
    write_metric(
        &mut output,
        "pipeline_storage_failures_total",
        "Failed storage writes",
        MetricType::Counter,
        summary.storage_failures,
    );
    write_metric(
        &mut output,
        "pipeline_broadcasts_total",
        "Ready events fanned out to clients",
        MetricType::Counter,
        summary.broadcasts_sent,
    );
    write_metric(
        &mut output,
        "pipeline_notify_clients",
        "Currently connected notification clients",
        MetricType::Gauge,
        summary.notify_clients.max(0) as u64,
    );

    output
}

fn json_response(status: StatusCode, body: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .expect("static response should not fail")
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    queue: Arc<QueueClient>,
    generate_queue: Arc<String>,
    metrics: Arc<Metrics>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/itineraries") => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "intake_body_read_failed");
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        r#"{"error":"unreadable body"}"#,
                    ));
                }
            };

            let mut job: GenerationJob = match serde_json::from_slice(&body) {
                Ok(job) => job,
                Err(e) => {
                    warn!(error = %e, "intake_invalid_payload");
                    return Ok(json_response(
                        StatusCode::BAD_REQUEST,
                        r#"{"error":"invalid generation request"}"#,
                    ));
                }
            };

            job.request_id = new_request_id();
            metrics.record_intake_request();

            match queue.send(&generate_queue, &job).await {
                Ok(()) => {
                    info!(
                        request_id = %job.request_id,
                        user = %job.user_id,
                        place = %job.place.display_name(),
                        "generation_request_enqueued"
                    );
                    Ok(json_response(StatusCode::OK, r#"{"status":"processing"}"#))
                }
                Err(e) => {
                    error!(error = %e, "intake_enqueue_failed");
                    Ok(json_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        r#"{"error":"queue unavailable"}"#,
                    ))
                }
            }
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&metrics.report());
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Start the intake/metrics HTTP server
pub async fn start_http_server(
    port: u16,
    queue: Arc<QueueClient>,
    generate_queue: String,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let generate_queue = Arc::new(generate_queue);

    info!(port = %port, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let queue = queue.clone();
                        let generate_queue = generate_queue.clone();
                        let metrics = metrics.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let queue = queue.clone();
                                let generate_queue = generate_queue.clone();
                                let metrics = metrics.clone();
                                async move {
                                    handle_request(req, queue, generate_queue, metrics).await
                                }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
