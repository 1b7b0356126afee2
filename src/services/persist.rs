//! Persistence stage
//!
//! Writes one storage row per validated itinerary and publishes the ready
//! event. The order matters: insert, publish, then ack (by returning `Ok`
//! to the queue layer). A crash between insert and ack redelivers the
//! message; the request-id guard turns that redelivery into a re-broadcast
//! of the already-stored row instead of a duplicate insert.

use crate::domain::jobs::{ItineraryJob, ReadyEvent};
use crate::infra::error::PipelineError;
use crate::infra::metrics::Metrics;
use crate::io::queue::{JobHandler, QueueClient};
use crate::io::storage::ItineraryStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

pub struct PersistStage {
    store: Arc<dyn ItineraryStore>,
    metrics: Arc<Metrics>,
}

impl PersistStage {
    pub fn new(store: Arc<dyn ItineraryStore>, metrics: Arc<Metrics>) -> Self {
        Self { store, metrics }
    }

    /// Store the itinerary, returning the storage id.
    ///
    /// Insert-if-absent keyed on the request id: a redelivered job whose
    /// row already exists reuses that row.
    pub async fn process(&self, job: &ItineraryJob) -> Result<String, PipelineError> {
        if !job.request_id.is_empty() {
            if let Some(existing) = self.store.find_by_request(&job.request_id).await? {
                warn!(
                    request_id = %job.request_id,
                    saved_id = %existing,
                    "duplicate_delivery_reusing_row"
                );
                self.metrics.record_duplicate_delivery();
                return Ok(existing);
            }
        }

        match self.store.insert(job).await {
            Ok(saved_id) => {
                self.metrics.record_itinerary_persisted();
                info!(
                    request_id = %job.request_id,
                    saved_id = %saved_id,
                    title = %job.itinerary.title,
                    "itinerary_persisted"
                );
                Ok(saved_id)
            }
            Err(e) => {
                self.metrics.record_storage_failure();
                Err(e)
            }
        }
    }
}

/// Queue handler: validated itinerary in, storage row + ready event out
pub struct PersistHandler {
    stage: PersistStage,
    queue: Arc<QueueClient>,
    ready_topic: String,
}

impl PersistHandler {
    pub fn new(stage: PersistStage, queue: Arc<QueueClient>, ready_topic: String) -> Arc<Self> {
        Arc::new(Self { stage, queue, ready_topic })
    }
}

#[async_trait]
impl JobHandler for PersistHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let job: ItineraryJob = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::Parse(format!("completion job: {e}")))?;

        info!(
            request_id = %job.request_id,
            title = %job.itinerary.title,
            "completion_job_received"
        );

        let saved_id = self.stage.process(&job).await?;

        let request_id = job.request_id.clone();
        let event = ReadyEvent::from_job(job, saved_id.clone());
        self.queue.send(&self.ready_topic, &event).await?;
        info!(request_id = %request_id, saved_id = %saved_id, "ready_event_published");
        Ok(())
    }
}
