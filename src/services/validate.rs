//! Validation stage
//!
//! Resolves each draft waypoint against the place-lookup provider and
//! overwrites its geography with broker-verified data. Lookups run one
//! waypoint at a time to stay inside the provider's rate limits.
//!
//! A waypoint is never dropped: if the qualified search, the bare-name
//! retry, and error handling all come up empty, it passes through exactly
//! as the draft produced it.

use crate::domain::jobs::ItineraryJob;
use crate::domain::request::Place;
use crate::domain::{Itinerary, Waypoint};
use crate::infra::error::PipelineError;
use crate::infra::metrics::Metrics;
use crate::io::places::{PlaceHit, PlaceSearch};
use crate::io::queue::{JobHandler, QueueClient};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Normalize a raw location label to "City - ST".
///
/// Labels arrive as "Palmas, TO", "Palmas, TO, Brasil", or already bare;
/// only the city and the first token of the second segment are kept.
fn format_location_label(raw: &str) -> String {
    let mut parts = raw.split(',');
    let city = parts.next().unwrap_or("").trim();
    match parts.next().map(|s| s.trim()) {
        Some(second) if !second.is_empty() => {
            let state = second.split_whitespace().next().unwrap_or(second);
            format!("{city} - {state}")
        }
        _ => city.to_string(),
    }
}

/// Pick the label used to qualify waypoint searches: the itinerary's own
/// location first, then the request's city or state.
fn location_label(itinerary: &Itinerary, place: &Place) -> Option<String> {
    let raw = if !itinerary.location.trim().is_empty() {
        Some(itinerary.location.as_str())
    } else {
        place.locality()
    };
    raw.map(format_location_label)
}

pub struct ValidateStage {
    places: Arc<dyn PlaceSearch>,
    metrics: Arc<Metrics>,
}

impl ValidateStage {
    pub fn new(places: Arc<dyn PlaceSearch>, metrics: Arc<Metrics>) -> Self {
        Self { places, metrics }
    }

    /// Correct every waypoint of the itinerary in place.
    ///
    /// The waypoint count is preserved unconditionally.
    pub async fn process(&self, itinerary: &mut Itinerary, place: &Place) {
        let label = location_label(itinerary, place);
        debug!(label = ?label, waypoints = itinerary.waypoints.len(), "validation_started");

        for waypoint in itinerary.waypoints.iter_mut() {
            match self.resolve(&waypoint.name, label.as_deref()).await {
                Some(hit) => {
                    self.apply(waypoint, hit);
                    self.metrics.record_waypoint_resolved();
                }
                None => {
                    debug!(waypoint = %waypoint.name, "waypoint_passed_through");
                    self.metrics.record_waypoint_passed_through();
                }
            }
        }
    }

    /// Search for one waypoint: qualified query first, bare name second.
    ///
    /// A lookup error ends the attempt immediately (the waypoint passes
    /// through); only a clean zero-result answer earns the bare retry.
    async fn resolve(&self, name: &str, label: Option<&str>) -> Option<PlaceHit> {
        let query = match label {
            Some(label) => format!("{} {}", name, label.replace(" - ", " ")),
            None => name.to_string(),
        };

        match self.places.text_search(&query).await {
            Ok(hits) if !hits.is_empty() => return hits.into_iter().next(),
            Ok(_) => {
                debug!(query = %query, "place_search_zero_results");
            }
            Err(e) => {
                warn!(query = %query, error = %e, "place_search_failed");
                return None;
            }
        }

        // Bare-name retry, only when the first query was qualified
        if label.is_some() {
            match self.places.text_search(name).await {
                Ok(hits) => hits.into_iter().next(),
                Err(e) => {
                    warn!(query = %name, error = %e, "place_search_retry_failed");
                    None
                }
            }
        } else {
            None
        }
    }

    /// Overwrite a waypoint with verified place data. The draft photo is
    /// kept when the place result carries none.
    fn apply(&self, waypoint: &mut Waypoint, hit: PlaceHit) {
        waypoint.latitude = hit.latitude;
        waypoint.longitude = hit.longitude;
        waypoint.place_id = Some(hit.place_id);
        waypoint.address = Some(hit.address);
        if let Some(reference) = hit.photo_references.first() {
            waypoint.photo_url = Some(self.places.photo_url(reference));
        }
    }
}

/// Queue handler: draft in, geographically corrected itinerary out to the
/// completion queue
pub struct ValidateHandler {
    stage: ValidateStage,
    queue: Arc<QueueClient>,
    complete_queue: String,
}

impl ValidateHandler {
    pub fn new(stage: ValidateStage, queue: Arc<QueueClient>, complete_queue: String) -> Arc<Self> {
        Arc::new(Self { stage, queue, complete_queue })
    }
}

#[async_trait]
impl JobHandler for ValidateHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let mut job: ItineraryJob = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::Parse(format!("validation job: {e}")))?;

        let before = job.itinerary.waypoints.len();
        info!(
            request_id = %job.request_id,
            title = %job.itinerary.title,
            waypoints = before,
            "validation_job_received"
        );

        let place = job.place.clone();
        self.stage.process(&mut job.itinerary, &place).await;
        debug_assert_eq!(job.itinerary.waypoints.len(), before);

        self.queue.send(&self.complete_queue, &job).await?;
        info!(request_id = %job.request_id, "itinerary_validated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Place provider scripted by query: records queries, answers from a map
    struct ScriptedPlaces {
        queries: Mutex<Vec<String>>,
        hits: Mutex<Vec<(String, Vec<PlaceHit>)>>,
        fail_all: bool,
    }

    impl ScriptedPlaces {
        fn new(hits: Vec<(&str, Vec<PlaceHit>)>) -> Self {
            Self {
                queries: Mutex::new(Vec::new()),
                hits: Mutex::new(
                    hits.into_iter().map(|(q, h)| (q.to_string(), h)).collect(),
                ),
                fail_all: false,
            }
        }

        fn failing() -> Self {
            Self { queries: Mutex::new(Vec::new()), hits: Mutex::new(Vec::new()), fail_all: true }
        }
    }

    fn hit(lat: f64, lng: f64, place_id: &str, photos: Vec<&str>) -> PlaceHit {
        PlaceHit {
            latitude: lat,
            longitude: lng,
            place_id: place_id.to_string(),
            address: format!("{place_id} address"),
            photo_references: photos.into_iter().map(str::to_string).collect(),
        }
    }

    #[async_trait]
    impl PlaceSearch for ScriptedPlaces {
        async fn text_search(&self, query: &str) -> Result<Vec<PlaceHit>, PipelineError> {
            self.queries.lock().push(query.to_string());
            if self.fail_all {
                return Err(PipelineError::provider("places", "unreachable"));
            }
            Ok(self
                .hits
                .lock()
                .iter()
                .find(|(q, _)| q == query)
                .map(|(_, h)| h.clone())
                .unwrap_or_default())
        }

        fn photo_url(&self, reference: &str) -> String {
            format!("https://places.example/photo/{reference}")
        }
    }

    fn itinerary(waypoint_names: &[&str]) -> Itinerary {
        let waypoints = waypoint_names
            .iter()
            .map(|name| {
                format!(
                    r#"{{"latitude": 0.0, "longitude": 0.0, "name": "{name}",
                        "type": "attraction", "activities": []}}"#
                )
            })
            .collect::<Vec<_>>()
            .join(",");
        serde_json::from_str(&format!(
            r#"{{"title": "T", "location": "Palmas, TO", "rating": 4.0, "reviews": 1,
                "price": "R$1", "description": "D", "waypoints": [{waypoints}]}}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_format_location_label() {
        assert_eq!(format_location_label("Palmas, TO"), "Palmas - TO");
        assert_eq!(format_location_label("Palmas, TO, Brasil"), "Palmas - TO");
        assert_eq!(format_location_label("Palmas"), "Palmas");
        assert_eq!(format_location_label("Rio de Janeiro, RJ 20000"), "Rio de Janeiro - RJ");
    }

    #[tokio::test]
    async fn test_successful_lookup_overwrites_geography() {
        let places = Arc::new(ScriptedPlaces::new(vec![(
            "Museu X Palmas TO",
            vec![hit(-10.2, -48.3, "ChIJmuseu", vec!["ref-1"])],
        )]));
        let stage = ValidateStage::new(places, Arc::new(Metrics::new()));

        let mut itinerary = itinerary(&["Museu X"]);
        let place = Place::default();
        stage.process(&mut itinerary, &place).await;

        let waypoint = &itinerary.waypoints[0];
        assert_eq!(waypoint.latitude, -10.2);
        assert_eq!(waypoint.place_id.as_deref(), Some("ChIJmuseu"));
        assert_eq!(waypoint.address.as_deref(), Some("ChIJmuseu address"));
        assert_eq!(
            waypoint.photo_url.as_deref(),
            Some("https://places.example/photo/ref-1")
        );
    }

    #[tokio::test]
    async fn test_zero_results_retries_with_bare_name() {
        let places = Arc::new(ScriptedPlaces::new(vec![(
            "Museu X",
            vec![hit(-10.0, -48.0, "ChIJbare", vec![])],
        )]));
        let stage = ValidateStage::new(places.clone(), Arc::new(Metrics::new()));

        let mut itinerary = itinerary(&["Museu X"]);
        stage.process(&mut itinerary, &Place::default()).await;

        // Qualified first ("Palmas - TO" collapses to "Palmas TO"), bare second
        let queries = places.queries.lock();
        assert_eq!(queries.as_slice(), ["Museu X Palmas TO", "Museu X"]);
        assert_eq!(itinerary.waypoints[0].place_id.as_deref(), Some("ChIJbare"));
    }

    #[tokio::test]
    async fn test_waypoint_count_is_preserved_on_total_failure() {
        let places = Arc::new(ScriptedPlaces::failing());
        let stage = ValidateStage::new(places.clone(), Arc::new(Metrics::new()));

        let mut itinerary = itinerary(&["A", "B", "C"]);
        stage.process(&mut itinerary, &Place::default()).await;

        assert_eq!(itinerary.waypoints.len(), 3);
        for waypoint in &itinerary.waypoints {
            assert_eq!(waypoint.latitude, 0.0);
            assert!(waypoint.place_id.is_none());
        }
        // Errors end the attempt without the bare retry
        assert_eq!(places.queries.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_both_searches_empty_passes_waypoint_through() {
        let places = Arc::new(ScriptedPlaces::new(vec![]));
        let stage = ValidateStage::new(places.clone(), Arc::new(Metrics::new()));

        let mut itinerary = itinerary(&["Museu X"]);
        stage.process(&mut itinerary, &Place::default()).await;

        assert_eq!(places.queries.lock().len(), 2);
        assert!(itinerary.waypoints[0].place_id.is_none());
        assert_eq!(itinerary.waypoints.len(), 1);
    }

    #[tokio::test]
    async fn test_hit_without_photos_keeps_draft_photo() {
        let places = Arc::new(ScriptedPlaces::new(vec![(
            "Museu X Palmas TO",
            vec![hit(-10.2, -48.3, "ChIJmuseu", vec![])],
        )]));
        let stage = ValidateStage::new(places, Arc::new(Metrics::new()));

        let mut itinerary = itinerary(&["Museu X"]);
        itinerary.waypoints[0].photo_url = Some("https://img.example/draft.png".to_string());
        stage.process(&mut itinerary, &Place::default()).await;

        assert_eq!(
            itinerary.waypoints[0].photo_url.as_deref(),
            Some("https://img.example/draft.png")
        );
        assert_eq!(itinerary.waypoints[0].place_id.as_deref(), Some("ChIJmuseu"));
    }

    #[tokio::test]
    async fn test_label_falls_back_to_request_place() {
        let places = Arc::new(ScriptedPlaces::new(vec![]));
        let stage = ValidateStage::new(places.clone(), Arc::new(Metrics::new()));

        let mut itin = itinerary(&["Museu X"]);
        itin.location = String::new();
        let place = Place { city: Some("Palmas".to_string()), ..Default::default() };
        stage.process(&mut itin, &place).await;

        assert_eq!(places.queries.lock()[0], "Museu X Palmas");
    }
}
