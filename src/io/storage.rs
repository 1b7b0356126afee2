//! Durable itinerary storage
//!
//! A REST row store (PostgREST-style): `insert` POSTs one row and returns
//! the stored representation, `find_by_request` filters on the request id.
//! The trait seam exists so the persistence stage can be tested against an
//! in-memory store.

use crate::domain::jobs::ItineraryJob;
use crate::infra::config::{api_key_from_env, StorageSection};
use crate::infra::error::PipelineError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Row store for validated itineraries.
///
/// Both methods return storage ids only; the pipeline never reads rows back
/// (read/list endpoints are outside its scope).
#[async_trait]
pub trait ItineraryStore: Send + Sync {
    /// Insert one row, returning the storage-assigned id
    async fn insert(&self, job: &ItineraryJob) -> Result<String, PipelineError>;

    /// Id of an existing row for this request, if one was already written
    async fn find_by_request(&self, request_id: &str) -> Result<Option<String>, PipelineError>;
}

// Compile-time assertion: ItineraryStore must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ItineraryStore) {}
};

/// Build the row body for one job.
///
/// Waypoints, place, and preferences are stored as JSON columns, mirroring
/// the queue payload so a stored row carries everything the request did.
pub fn storage_row(job: &ItineraryJob) -> serde_json::Value {
    serde_json::json!({
        "request_id": job.request_id,
        "user_id": job.user_id,
        "title": job.itinerary.title,
        "location": job.itinerary.location,
        "rating": job.itinerary.rating,
        "reviews": job.itinerary.reviews,
        "price": job.itinerary.price,
        "description": job.itinerary.description,
        "image_url": job.itinerary.image_url,
        "waypoints": job.itinerary.waypoints,
        "place": job.place,
        "preferences": job.preferences,
        "created_at": chrono::Utc::now().to_rfc3339(),
    })
}

/// Pull the id out of a returned row, tolerating numeric and string keys
fn row_id(row: &serde_json::Value) -> Option<String> {
    match row.get("id") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

/// REST row store client
pub struct RestStore {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    table: String,
}

impl RestStore {
    pub fn from_config(section: &StorageSection) -> Result<Self, PipelineError> {
        let api_key = api_key_from_env(&section.api_key_env).ok_or_else(|| {
            PipelineError::Storage(format!("{} not set", section.api_key_env))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(section.timeout_ms))
            .build()
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        Ok(Self {
            http,
            api_url: section.api_url.clone(),
            api_key,
            table: section.table.clone(),
        })
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.api_url, self.table)
    }
}

#[async_trait]
impl ItineraryStore for RestStore {
    async fn insert(&self, job: &ItineraryJob) -> Result<String, PipelineError> {
        let row = storage_row(job);
        let response = self
            .http
            .post(self.table_url())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PipelineError::Storage(format!("insert status {status}: {message}")));
        }

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        let id = rows
            .first()
            .and_then(row_id)
            .ok_or_else(|| PipelineError::Storage("insert returned no row id".to_string()))?;

        debug!(id = %id, table = %self.table, "itinerary_row_inserted");
        Ok(id)
    }

    async fn find_by_request(&self, request_id: &str) -> Result<Option<String>, PipelineError> {
        let response = self
            .http
            .get(self.table_url())
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(&[
                ("request_id", format!("eq.{request_id}")),
                ("select", "id".to_string()),
                ("limit", "1".to_string()),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PipelineError::Storage(format!("lookup status {status}: {message}")));
        }

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| PipelineError::Storage(e.to_string()))?;

        Ok(rows.first().and_then(row_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> ItineraryJob {
        serde_json::from_str(
            r#"{
                "requestId": "r-9",
                "place": {"name": "Palmas", "state": "TO"},
                "preferences": {"period": ["Morning"]},
                "userId": "u7",
                "itinerary": {
                    "title": "Palmas Highlights",
                    "location": "Palmas, TO",
                    "rating": 4.2,
                    "reviews": 88,
                    "price": "R$150/person",
                    "description": "Cerrado and lake",
                    "imageUrl": "https://img.example/cover.png",
                    "waypoints": [{
                        "latitude": -10.18,
                        "longitude": -48.33,
                        "name": "Praia da Graciosa",
                        "type": "attraction",
                        "activities": []
                    }]
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_storage_row_carries_request_context() {
        let row = storage_row(&sample_job());
        assert_eq!(row["request_id"], "r-9");
        assert_eq!(row["user_id"], "u7");
        assert_eq!(row["title"], "Palmas Highlights");
        assert_eq!(row["image_url"], "https://img.example/cover.png");
        assert_eq!(row["waypoints"].as_array().unwrap().len(), 1);
        assert_eq!(row["place"]["name"], "Palmas");
        // RFC 3339 timestamp
        assert!(row["created_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_row_id_handles_numeric_and_string_ids() {
        assert_eq!(row_id(&serde_json::json!({"id": 42})), Some("42".to_string()));
        assert_eq!(row_id(&serde_json::json!({"id": "uuid-1"})), Some("uuid-1".to_string()));
        assert_eq!(row_id(&serde_json::json!({"other": 1})), None);
    }
}
