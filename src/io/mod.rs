//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `queue` - Broker queue client with ack/requeue and reconnect handling
//! - `textgen` - Text generation provider (itinerary drafts)
//! - `imagegen` - Image generation provider (covers and waypoint photos)
//! - `places` - Place lookup provider (waypoint validation)
//! - `storage` - Durable itinerary row store
//! - `http` - HTTP intake endpoint and Prometheus metrics
//! - `notify_server` - Broadcast hub for completion events
//! - `notify_client` - Reconnecting client with multiplexed subscriptions

pub mod http;
pub mod imagegen;
pub mod notify_client;
pub mod notify_server;
pub mod places;
pub mod queue;
pub mod storage;
pub mod textgen;

// Re-export commonly used types
pub use imagegen::{ImageApiClient, ImageGenerator, ImageSize};
pub use notify_client::{ConnectionState, NotifyClient, Subscription};
pub use notify_server::{NotifyHub, ReadyBroadcaster, READY_EVENT};
pub use places::{PlaceHit, PlaceSearch, PlacesApiClient};
pub use queue::{JobHandler, QueueClient};
pub use storage::{ItineraryStore, RestStore};
pub use textgen::{GeminiClient, TextGenerator};
