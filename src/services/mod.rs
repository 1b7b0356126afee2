//! Services - the three pipeline stages
//!
//! Each stage owns its provider clients and exposes a queue-facing handler:
//! - `generate` - request → draft itinerary (text + images)
//! - `validate` - draft → geographically corrected itinerary
//! - `persist` - validated itinerary → storage row + ready event

pub mod generate;
pub mod persist;
pub mod validate;

// Re-export commonly used types
pub use generate::{GenerateHandler, GenerateStage};
pub use persist::{PersistHandler, PersistStage};
pub use validate::{ValidateHandler, ValidateStage};
