//! Itinerary data model
//!
//! The generation stage parses provider output into an [`Itinerary`]; the
//! validation stage corrects waypoint geography in place. Field names follow
//! the JSON the text provider is asked to emit (camelCase on the wire).

use serde::{Deserialize, Serialize};

/// Category of a waypoint stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaypointCategory {
    Attraction,
    Restaurant,
    Hotel,
    Transport,
}

impl WaypointCategory {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            WaypointCategory::Attraction => "attraction",
            WaypointCategory::Restaurant => "restaurant",
            WaypointCategory::Hotel => "hotel",
            WaypointCategory::Transport => "transport",
        }
    }
}

/// A single activity at a waypoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub title: String,
    pub description: String,
    /// Free-form duration label ("1h30")
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
}

/// One stop in an itinerary
///
/// Coordinates are provisional until the validation stage has resolved the
/// waypoint against the place-lookup provider; `place_id` and `address` are
/// only present after a successful lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub name: String,
    #[serde(rename = "type")]
    pub category: WaypointCategory,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// A generated travel plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Itinerary {
    pub title: String,
    /// Location label ("Palmas, TO")
    pub location: String,
    pub rating: f64,
    pub reviews: u32,
    /// Price label ("R$300/person")
    pub price: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub waypoints: Vec<Waypoint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "title": "A Day in Palmas",
            "location": "Palmas, TO",
            "rating": 4.5,
            "reviews": 150,
            "price": "R$300/person",
            "description": "Lakeside capital highlights",
            "waypoints": [
                {
                    "latitude": -10.1831,
                    "longitude": -48.3336,
                    "name": "Praia da Graciosa",
                    "type": "attraction",
                    "activities": [
                        {
                            "title": "Sunset walk",
                            "description": "Walk the boardwalk",
                            "duration": "1h30",
                            "tip": "Go before 18:00"
                        }
                    ]
                },
                {
                    "latitude": -10.19,
                    "longitude": -48.33,
                    "name": "Restaurante do Lago",
                    "type": "restaurant",
                    "activities": []
                }
            ]
        }"#
    }

    #[test]
    fn test_parse_provider_itinerary() {
        let itinerary: Itinerary = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(itinerary.title, "A Day in Palmas");
        assert_eq!(itinerary.waypoints.len(), 2);
        assert_eq!(itinerary.waypoints[0].category, WaypointCategory::Attraction);
        assert_eq!(itinerary.waypoints[0].activities[0].duration, "1h30");
        assert!(itinerary.image_url.is_none());
        assert!(itinerary.waypoints[1].photo_url.is_none());
    }

    #[test]
    fn test_category_round_trip() {
        for (cat, s) in [
            (WaypointCategory::Attraction, "\"attraction\""),
            (WaypointCategory::Restaurant, "\"restaurant\""),
            (WaypointCategory::Hotel, "\"hotel\""),
            (WaypointCategory::Transport, "\"transport\""),
        ] {
            assert_eq!(serde_json::to_string(&cat).unwrap(), s);
            let back: WaypointCategory = serde_json::from_str(s).unwrap();
            assert_eq!(back, cat);
        }
    }

    #[test]
    fn test_validated_fields_serialize_camel_case() {
        let mut itinerary: Itinerary = serde_json::from_str(sample_json()).unwrap();
        itinerary.waypoints[0].place_id = Some("ChIJ123".to_string());
        itinerary.waypoints[0].address = Some("Av. Parque, Palmas - TO".to_string());
        itinerary.waypoints[0].photo_url = Some("https://example.com/p.jpg".to_string());

        let out = serde_json::to_string(&itinerary).unwrap();
        assert!(out.contains("\"placeId\":\"ChIJ123\""));
        assert!(out.contains("\"photoUrl\""));
        assert!(out.contains("\"type\":\"attraction\""));
    }
}
