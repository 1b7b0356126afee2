//! Queue payloads downstream of generation

use crate::domain::itinerary::Itinerary;
use crate::domain::request::{Place, Preferences};
use serde::{Deserialize, Serialize};

/// Payload on the validation and completion queues: the original request
/// context plus the itinerary produced so far.
///
/// The shape is identical on both queues; only the itinerary inside moves
/// from provisional to broker-verified coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItineraryJob {
    #[serde(default)]
    pub request_id: String,
    pub place: Place,
    pub preferences: Preferences,
    pub user_id: String,
    pub itinerary: Itinerary,
}

/// Payload broadcast on the ready topic once a row is stored.
///
/// Transient and wire-only: it is never persisted, only fanned out to
/// connected notification clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyEvent {
    #[serde(default)]
    pub request_id: String,
    pub place: Place,
    pub preferences: Preferences,
    pub user_id: String,
    pub itinerary: Itinerary,
    pub saved_id: String,
}

impl ReadyEvent {
    /// Build the broadcast payload from a completed job and its storage id
    pub fn from_job(job: ItineraryJob, saved_id: String) -> Self {
        Self {
            request_id: job.request_id,
            place: job.place,
            preferences: job.preferences,
            user_id: job.user_id,
            itinerary: job.itinerary,
            saved_id,
        }
    }
}
