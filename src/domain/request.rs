//! Incoming generation requests and their wire shape

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new UUIDv7 request id (time-sortable)
pub fn new_request_id() -> String {
    Uuid::now_v7().to_string()
}

/// Origin place of a requested itinerary
///
/// Coordinates and locality fields are all optional: the intake accepts
/// whatever the place picker produced, and the generation prompt degrades
/// to "a destination" when the name is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Place {
    /// Display name used in prompts, falling back when the picker sent none
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("a destination")
    }

    /// Best-effort locality label (city, else state)
    pub fn locality(&self) -> Option<&str> {
        self.city.as_deref().or(self.state.as_deref())
    }
}

/// User preference set attached to a generation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    /// Time-of-day tags ("Morning", "Afternoon", ...)
    #[serde(default)]
    pub period: Vec<String>,
    /// Place-type tags ("Restaurant", "Museum", ...)
    #[serde(default)]
    pub types: Vec<String>,
    /// Budget tier tags
    #[serde(default)]
    pub budget: Vec<String>,
    /// Companion tags ("Couple", "Family", ...)
    #[serde(default)]
    pub company: Vec<String>,
    /// Budget amount in the user's currency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_value: Option<f64>,
    /// Free-text note from the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Payload on the generation queue: one itinerary request
///
/// `request_id` is stamped at intake and carried end-to-end so the
/// persistence stage can deduplicate broker redeliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationJob {
    #[serde(default)]
    pub request_id: String,
    pub place: Place,
    pub preferences: Preferences,
    pub user_id: String,
}
