//! End-to-end pipeline flow over in-process collaborators
//!
//! Drives one request through all three stages (generate → validate →
//! persist) with mock providers, checking the invariants the stages must
//! uphold between each other: waypoint counts survive, degraded image and
//! lookup results never fail the item, and the final broadcast payload
//! carries the storage id.

use async_trait::async_trait;
use itinerary_pipeline::domain::jobs::{ItineraryJob, ReadyEvent};
use itinerary_pipeline::domain::request::{new_request_id, GenerationJob};
use itinerary_pipeline::infra::config::ImagesSection;
use itinerary_pipeline::infra::{Metrics, PipelineError};
use itinerary_pipeline::io::imagegen::{ImageGenerator, ImageSize};
use itinerary_pipeline::io::places::{PlaceHit, PlaceSearch};
use itinerary_pipeline::io::storage::ItineraryStore;
use itinerary_pipeline::io::textgen::TextGenerator;
use itinerary_pipeline::services::{GenerateStage, PersistStage, ValidateStage};
use parking_lot::Mutex;
use std::sync::Arc;

struct CannedText;

#[async_trait]
impl TextGenerator for CannedText {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        assert!(prompt.contains("Ipanema"));
        Ok(r#"Here you go:
{
    "title": "Ipanema by the Sea",
    "location": "Rio de Janeiro, RJ",
    "rating": 4.7,
    "reviews": 320,
    "price": "R$250/person",
    "description": "A beachside day in Ipanema",
    "waypoints": [
        {
            "latitude": -22.98,
            "longitude": -43.2,
            "name": "Praia de Ipanema",
            "type": "attraction",
            "activities": [{
                "title": "Morning swim",
                "description": "Swim at posto 9",
                "duration": "2h",
                "tip": "Arrive early"
            }]
        },
        {
            "latitude": -22.97,
            "longitude": -43.19,
            "name": "Garota de Ipanema",
            "type": "restaurant",
            "activities": []
        }
    ]
}"#
        .to_string())
    }
}

/// Rejects every prompt, and the fallback too: all images degrade to
/// placeholders
struct BrokenImages;

#[async_trait]
impl ImageGenerator for BrokenImages {
    async fn generate(&self, _prompt: &str, _size: ImageSize) -> Result<String, PipelineError> {
        Err(PipelineError::rejected("images", "always down"))
    }
}

/// Resolves only the beach; the restaurant stays unverified
struct PartialPlaces;

#[async_trait]
impl PlaceSearch for PartialPlaces {
    async fn text_search(&self, query: &str) -> Result<Vec<PlaceHit>, PipelineError> {
        if query.starts_with("Praia de Ipanema") {
            Ok(vec![PlaceHit {
                latitude: -22.9868,
                longitude: -43.2065,
                place_id: "ChIJipanema".to_string(),
                address: "Av. Vieira Souto, Rio de Janeiro - RJ".to_string(),
                photo_references: vec!["beach-ref".to_string()],
            }])
        } else {
            Ok(vec![])
        }
    }

    fn photo_url(&self, reference: &str) -> String {
        format!("https://places.example/photo/{reference}")
    }
}

#[derive(Default)]
struct MemoryStore {
    rows: Mutex<Vec<(String, String, serde_json::Value)>>,
}

#[async_trait]
impl ItineraryStore for MemoryStore {
    async fn insert(&self, job: &ItineraryJob) -> Result<String, PipelineError> {
        let mut rows = self.rows.lock();
        let id = format!("row-{}", rows.len() + 1);
        rows.push((
            job.request_id.clone(),
            id.clone(),
            itinerary_pipeline::io::storage::storage_row(job),
        ));
        Ok(id)
    }

    async fn find_by_request(&self, request_id: &str) -> Result<Option<String>, PipelineError> {
        Ok(self
            .rows
            .lock()
            .iter()
            .find(|(rid, _, _)| rid == request_id)
            .map(|(_, id, _)| id.clone()))
    }
}

fn request() -> GenerationJob {
    let mut job: GenerationJob = serde_json::from_str(
        r#"{"place": {"name": "Ipanema", "city": "Rio de Janeiro"},
            "preferences": {"types": ["Restaurante"]},
            "userId": "u1"}"#,
    )
    .unwrap();
    job.request_id = new_request_id();
    job
}

#[tokio::test]
async fn test_request_flows_through_all_three_stages() {
    let metrics = Arc::new(Metrics::new());
    let generate = GenerateStage::new(
        Arc::new(CannedText),
        Arc::new(BrokenImages),
        &ImagesSection::default(),
        metrics.clone(),
    );
    let validate = ValidateStage::new(Arc::new(PartialPlaces), metrics.clone());
    let store = Arc::new(MemoryStore::default());
    let persist = PersistStage::new(store.clone(), metrics.clone());

    // Generation: at least one waypoint, every image slot settled
    let job = request();
    let itinerary = generate.process(&job).await.unwrap();
    assert!(!itinerary.waypoints.is_empty());
    assert_eq!(itinerary.waypoints.len(), 2);
    // Image provider is down entirely: cover and photos are placeholders
    assert_eq!(itinerary.image_url.as_deref(), Some("https://via.placeholder.com/512"));
    for waypoint in &itinerary.waypoints {
        assert_eq!(waypoint.photo_url.as_deref(), Some("https://via.placeholder.com/256"));
    }

    // Validation: count preserved, resolvable waypoints gain geography
    let mut validated = ItineraryJob {
        request_id: job.request_id.clone(),
        place: job.place.clone(),
        preferences: job.preferences.clone(),
        user_id: job.user_id.clone(),
        itinerary,
    };
    let place = validated.place.clone();
    validate.process(&mut validated.itinerary, &place).await;

    assert_eq!(validated.itinerary.waypoints.len(), 2);
    let beach = &validated.itinerary.waypoints[0];
    assert_eq!(beach.place_id.as_deref(), Some("ChIJipanema"));
    assert_eq!(beach.latitude, -22.9868);
    assert_eq!(beach.photo_url.as_deref(), Some("https://places.example/photo/beach-ref"));
    let restaurant = &validated.itinerary.waypoints[1];
    assert!(restaurant.place_id.is_none());
    assert_eq!(restaurant.latitude, -22.97);

    // Persistence: one row owned by the requester, broadcast carries its id
    let saved_id = persist.process(&validated).await.unwrap();
    assert_eq!(saved_id, "row-1");
    {
        let rows = store.rows.lock();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].2["user_id"], "u1");
        assert_eq!(rows[0].2["waypoints"].as_array().unwrap().len(), 2);
    }

    let event = ReadyEvent::from_job(validated, saved_id);
    let payload = serde_json::to_value(&event).unwrap();
    assert_eq!(payload["savedId"], "row-1");
    assert_eq!(payload["userId"], "u1");
    assert_eq!(payload["itinerary"]["waypoints"].as_array().unwrap().len(), 2);

    // Stage metrics tell the degradation story
    let summary = metrics.report();
    assert_eq!(summary.image_placeholders, 3);
    assert_eq!(summary.waypoints_resolved, 1);
    assert_eq!(summary.waypoints_passed_through, 1);
    assert_eq!(summary.itineraries_persisted, 1);
}

#[tokio::test]
async fn test_redelivered_completion_job_does_not_duplicate_rows() {
    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(MemoryStore::default());
    let persist = PersistStage::new(store.clone(), metrics.clone());

    let job = request();
    let completion = ItineraryJob {
        request_id: job.request_id.clone(),
        place: job.place,
        preferences: job.preferences,
        user_id: job.user_id,
        itinerary: serde_json::from_str(
            r#"{"title": "T", "location": "L", "rating": 4.0, "reviews": 1,
                "price": "R$1", "description": "D", "waypoints": []}"#,
        )
        .unwrap(),
    };

    let first = persist.process(&completion).await.unwrap();
    // Broker redelivery after a crash between insert and ack
    let second = persist.process(&completion).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(store.rows.lock().len(), 1);
    assert_eq!(metrics.report().duplicate_deliveries, 1);
}
