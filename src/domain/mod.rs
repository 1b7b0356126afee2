//! Domain models - requests, itineraries, and queue payloads
//!
//! This module contains the canonical data types used throughout the system:
//! - `GenerationJob` - an incoming itinerary request travelling the pipeline
//! - `Itinerary` / `Waypoint` / `Activity` - the generated travel plan
//! - `ItineraryJob` - a request plus its draft/validated itinerary
//! - `ReadyEvent` - the payload broadcast once an itinerary is persisted

pub mod itinerary;
pub mod jobs;
pub mod request;

// Re-export commonly used types at module level
pub use itinerary::{Activity, Itinerary, Waypoint, WaypointCategory};
pub use jobs::{ItineraryJob, ReadyEvent};
pub use request::{new_request_id, GenerationJob, Place, Preferences};
