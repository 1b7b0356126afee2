//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::info;

/// Pipeline-wide counters, shared across tasks via `Arc`
#[derive(Default)]
pub struct Metrics {
    // Intake
    intake_requests: AtomicU64,
    // Reliability layer
    jobs_consumed: AtomicU64,
    jobs_acked: AtomicU64,
    jobs_requeued: AtomicU64,
    jobs_dead_lettered: AtomicU64,
    broker_reconnects: AtomicU64,
    // Generation stage
    images_generated: AtomicU64,
    image_fallbacks: AtomicU64,
    image_placeholders: AtomicU64,
    // Validation stage
    waypoints_resolved: AtomicU64,
    waypoints_passed_through: AtomicU64,
    // Persistence stage
    itineraries_persisted: AtomicU64,
    duplicate_deliveries: AtomicU64,
    storage_failures: AtomicU64,
    // Notification fabric
    broadcasts_sent: AtomicU64,
    notify_clients: AtomicI64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_intake_request(&self) {
        self.intake_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_consumed(&self) {
        self.jobs_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_acked(&self) {
        self.jobs_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_requeued(&self) {
        self.jobs_requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_job_dead_lettered(&self) {
        self.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broker_reconnect(&self) {
        self.broker_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_image_generated(&self) {
        self.images_generated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_image_fallback(&self) {
        self.image_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_image_placeholder(&self) {
        self.image_placeholders.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_waypoint_resolved(&self) {
        self.waypoints_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_waypoint_passed_through(&self) {
        self.waypoints_passed_through.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_itinerary_persisted(&self) {
        self.itineraries_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_delivery(&self) {
        self.duplicate_deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_broadcast_sent(&self) {
        self.broadcasts_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notify_client_connected(&self) {
        self.notify_clients.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notify_client_disconnected(&self) {
        self.notify_clients.fetch_sub(1, Ordering::Relaxed);
    }

    /// Snapshot all counters without resetting them
    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            intake_requests: self.intake_requests.load(Ordering::Relaxed),
            jobs_consumed: self.jobs_consumed.load(Ordering::Relaxed),
            jobs_acked: self.jobs_acked.load(Ordering::Relaxed),
            jobs_requeued: self.jobs_requeued.load(Ordering::Relaxed),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::Relaxed),
            broker_reconnects: self.broker_reconnects.load(Ordering::Relaxed),
            images_generated: self.images_generated.load(Ordering::Relaxed),
            image_fallbacks: self.image_fallbacks.load(Ordering::Relaxed),
            image_placeholders: self.image_placeholders.load(Ordering::Relaxed),
            waypoints_resolved: self.waypoints_resolved.load(Ordering::Relaxed),
            waypoints_passed_through: self.waypoints_passed_through.load(Ordering::Relaxed),
            itineraries_persisted: self.itineraries_persisted.load(Ordering::Relaxed),
            duplicate_deliveries: self.duplicate_deliveries.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            broadcasts_sent: self.broadcasts_sent.load(Ordering::Relaxed),
            notify_clients: self.notify_clients.load(Ordering::Relaxed).max(0),
        }
    }
}

/// Point-in-time snapshot of all counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub intake_requests: u64,
    pub jobs_consumed: u64,
    pub jobs_acked: u64,
    pub jobs_requeued: u64,
    pub jobs_dead_lettered: u64,
    pub broker_reconnects: u64,
    pub images_generated: u64,
    pub image_fallbacks: u64,
    pub image_placeholders: u64,
    pub waypoints_resolved: u64,
    pub waypoints_passed_through: u64,
    pub itineraries_persisted: u64,
    pub duplicate_deliveries: u64,
    pub storage_failures: u64,
    pub broadcasts_sent: u64,
    pub notify_clients: i64,
}

impl MetricsSummary {
    /// Emit the summary as one structured log line
    pub fn log(&self) {
        info!(
            intake = %self.intake_requests,
            consumed = %self.jobs_consumed,
            acked = %self.jobs_acked,
            requeued = %self.jobs_requeued,
            dead_lettered = %self.jobs_dead_lettered,
            reconnects = %self.broker_reconnects,
            images = %self.images_generated,
            image_fallbacks = %self.image_fallbacks,
            image_placeholders = %self.image_placeholders,
            resolved = %self.waypoints_resolved,
            passed_through = %self.waypoints_passed_through,
            persisted = %self.itineraries_persisted,
            duplicates = %self.duplicate_deliveries,
            storage_failures = %self.storage_failures,
            broadcasts = %self.broadcasts_sent,
            clients = %self.notify_clients,
            "metrics_summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_job_consumed();
        metrics.record_job_consumed();
        metrics.record_job_acked();
        metrics.record_image_placeholder();

        let summary = metrics.report();
        assert_eq!(summary.jobs_consumed, 2);
        assert_eq!(summary.jobs_acked, 1);
        assert_eq!(summary.jobs_requeued, 0);
        assert_eq!(summary.image_placeholders, 1);
    }

    #[test]
    fn test_client_gauge_never_reports_negative() {
        let metrics = Metrics::new();
        metrics.record_notify_client_disconnected();
        assert_eq!(metrics.report().notify_clients, 0);

        metrics.record_notify_client_connected();
        metrics.record_notify_client_connected();
        metrics.record_notify_client_disconnected();
        assert_eq!(metrics.report().notify_clients, 1);
    }
}
