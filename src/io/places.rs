//! Place lookup provider
//!
//! The validation stage resolves each waypoint through a text search against
//! a places REST API. Photo URLs are built by the client because only it
//! holds the API key the photo endpoint requires.

use crate::infra::config::{api_key_from_env, PlacesSection};
use crate::infra::error::PipelineError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// One result of a place text search
#[derive(Debug, Clone)]
pub struct PlaceHit {
    pub latitude: f64,
    pub longitude: f64,
    pub place_id: String,
    pub address: String,
    /// Opaque photo references, resolvable via [`PlaceSearch::photo_url`]
    pub photo_references: Vec<String>,
}

/// Free-text place search.
#[async_trait]
pub trait PlaceSearch: Send + Sync {
    async fn text_search(&self, query: &str) -> Result<Vec<PlaceHit>, PipelineError>;

    /// Resolve a photo reference from a hit into a fetchable URL
    fn photo_url(&self, reference: &str) -> String;
}

// Compile-time assertion: PlaceSearch must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn PlaceSearch) {}
};

#[derive(Debug, Deserialize)]
struct TextSearchResponse {
    #[serde(default)]
    results: Vec<TextSearchResult>,
}

#[derive(Debug, Deserialize)]
struct TextSearchResult {
    geometry: Geometry,
    place_id: String,
    formatted_address: String,
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct Photo {
    photo_reference: String,
}

/// Places REST client (Google-style textsearch/photo endpoints)
pub struct PlacesApiClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    photo_max_width: u32,
}

impl PlacesApiClient {
    pub fn from_config(section: &PlacesSection) -> Result<Self, PipelineError> {
        let api_key = api_key_from_env(&section.api_key_env).ok_or_else(|| {
            PipelineError::provider("places", format!("{} not set", section.api_key_env))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(section.timeout_ms))
            .build()
            .map_err(|e| PipelineError::provider("places", e.to_string()))?;

        Ok(Self {
            http,
            api_url: section.api_url.clone(),
            api_key,
            photo_max_width: section.photo_max_width,
        })
    }
}

#[async_trait]
impl PlaceSearch for PlacesApiClient {
    async fn text_search(&self, query: &str) -> Result<Vec<PlaceHit>, PipelineError> {
        let url = format!("{}/textsearch/json", self.api_url);
        let response = self
            .http
            .get(&url)
            .query(&[("query", query), ("key", &self.api_key)])
            .send()
            .await
            .map_err(|e| PipelineError::provider("places", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PipelineError::provider(
                "places",
                format!("status {status}: {message}"),
            ));
        }

        let parsed: TextSearchResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::provider("places", e.to_string()))?;

        let hits: Vec<PlaceHit> = parsed
            .results
            .into_iter()
            .map(|r| PlaceHit {
                latitude: r.geometry.location.lat,
                longitude: r.geometry.location.lng,
                place_id: r.place_id,
                address: r.formatted_address,
                photo_references: r.photos.into_iter().map(|p| p.photo_reference).collect(),
            })
            .collect();

        debug!(query = %query, hits = hits.len(), "place_search_completed");
        Ok(hits)
    }

    fn photo_url(&self, reference: &str) -> String {
        format!(
            "{}/photo?maxwidth={}&photoreference={}&key={}",
            self.api_url, self.photo_max_width, reference, self.api_key
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_search_response_parsing() {
        let json = r#"{
            "results": [{
                "geometry": {"location": {"lat": -10.24, "lng": -48.32}},
                "place_id": "ChIJabc",
                "formatted_address": "Av. Teotonio Segurado, Palmas - TO",
                "photos": [{"photo_reference": "ref-1"}, {"photo_reference": "ref-2"}]
            }]
        }"#;

        let parsed: TextSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.results.len(), 1);
        let result = &parsed.results[0];
        assert_eq!(result.place_id, "ChIJabc");
        assert_eq!(result.geometry.location.lat, -10.24);
        assert_eq!(result.photos.len(), 2);
    }

    #[test]
    fn test_zero_results_parses_to_empty() {
        let parsed: TextSearchResponse =
            serde_json::from_str(r#"{"results": [], "status": "ZERO_RESULTS"}"#).unwrap();
        assert!(parsed.results.is_empty());
    }

    #[test]
    fn test_photos_default_to_empty() {
        let json = r#"{
            "results": [{
                "geometry": {"location": {"lat": 1.0, "lng": 2.0}},
                "place_id": "x",
                "formatted_address": "somewhere"
            }]
        }"#;
        let parsed: TextSearchResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.results[0].photos.is_empty());
    }
}
