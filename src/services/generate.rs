//! Generation stage
//!
//! Consumes a generation request, asks the text provider for an itinerary,
//! parses the first JSON object out of its free-form reply, and fills in
//! every missing image before forwarding the draft to the validation queue.
//!
//! Image generation never fails the item: a rejected prompt gets one
//! fallback attempt with a generic prompt at a smaller size, and anything
//! still failing is replaced by the placeholder URL.

use crate::domain::jobs::ItineraryJob;
use crate::domain::request::{GenerationJob, Place, Preferences};
use crate::domain::Itinerary;
use crate::infra::config::ImagesSection;
use crate::infra::error::PipelineError;
use crate::infra::metrics::Metrics;
use crate::io::imagegen::{ImageGenerator, ImageSize};
use crate::io::queue::{JobHandler, QueueClient};
use crate::io::textgen::TextGenerator;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Generic prompt used when the provider rejects the real one
const FALLBACK_PROMPT: &str = "Photorealistic tourist spot, daytime";

/// Sanitized prompts shorter than this fail fast
const MIN_PROMPT_LEN: usize = 10;

/// Prompts are truncated to this many characters after sanitization
const MAX_PROMPT_LEN: usize = 500;

/// Build the itinerary prompt for one request
fn build_prompt(place: &Place, preferences: &Preferences) -> String {
    let join = |tags: &[String]| {
        if tags.is_empty() {
            "Not specified".to_string()
        } else {
            tags.join(", ")
        }
    };
    let budget = preferences
        .budget_value
        .map(|v| format!("R${v}"))
        .unwrap_or_else(|| join(&preferences.budget));
    let note = preferences.note.as_deref().unwrap_or("None");

    format!(
        r#"Generate a detailed tourist itinerary for {name} in {locality}.

User preferences:
- Period(s): {period}
- Type(s): {types}
- Budget: {budget}
- Company: {company}
- Note: {note}

Return valid JSON in the following format:
{{
  "title": "Itinerary title",
  "location": "Location",
  "rating": 4.5,
  "reviews": 150,
  "price": "R$300/person",
  "description": "Itinerary description",
  "imageUrl": "https://images.example.com/photo.jpg",
  "waypoints": [
    {{
      "latitude": -10.1831,
      "longitude": -48.3336,
      "name": "Place name",
      "type": "attraction|restaurant|hotel|transport",
      "activities": [
        {{
          "title": "Activity title",
          "description": "Activity description",
          "duration": "1h30",
          "tip": "A tip for the visitor"
        }}
      ]
    }}
  ]
}}

Make sure that:
1. The JSON is valid and well formatted
2. The coordinates are realistic for the location
3. The activities are practical and interesting
4. The price is realistic for the stated budget
5. The description is attractive and informative"#,
        name = place.display_name(),
        locality = place.locality().unwrap_or("an unknown location"),
        period = join(&preferences.period),
        types = join(&preferences.types),
        budget = budget,
        company = join(&preferences.company),
        note = note,
    )
}

/// Extract the first top-level `{...}` block from free-form provider text.
///
/// Models wrap JSON in prose and markdown fences; everything from the first
/// `{` to the last `}` is taken as the candidate object.
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Strip an image prompt down to letters, digits, spaces, and commas,
/// truncated to the provider's limit. Fails fast when too little survives.
fn sanitize_prompt(prompt: &str) -> Result<String, PipelineError> {
    let sanitized: String = prompt
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ' || *c == ',')
        .take(MAX_PROMPT_LEN)
        .collect();

    if sanitized.len() < MIN_PROMPT_LEN {
        return Err(PipelineError::rejected(
            "images",
            format!("sanitized prompt too short: {:?}", sanitized),
        ));
    }
    Ok(sanitized)
}

/// Which image slot a concurrent fill task belongs to
#[derive(Debug, Clone, Copy)]
enum ImageSlot {
    Cover,
    Waypoint(usize),
}

pub struct GenerateStage {
    text: Arc<dyn TextGenerator>,
    images: Arc<dyn ImageGenerator>,
    placeholder_cover: String,
    placeholder_waypoint: String,
    metrics: Arc<Metrics>,
}

impl GenerateStage {
    pub fn new(
        text: Arc<dyn TextGenerator>,
        images: Arc<dyn ImageGenerator>,
        images_config: &ImagesSection,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            text,
            images,
            placeholder_cover: images_config.placeholder_cover.clone(),
            placeholder_waypoint: images_config.placeholder_waypoint.clone(),
            metrics,
        }
    }

    /// Turn one request into a draft itinerary with every image slot filled
    pub async fn process(&self, job: &GenerationJob) -> Result<Itinerary, PipelineError> {
        let prompt = build_prompt(&job.place, &job.preferences);
        let raw = self.text.generate(&prompt).await?;

        let block = extract_json_block(&raw).ok_or_else(|| {
            PipelineError::Parse("generation output contains no JSON object".to_string())
        })?;
        let mut itinerary: Itinerary = serde_json::from_str(block)
            .map_err(|e| PipelineError::Parse(format!("itinerary JSON: {e}")))?;

        self.fill_missing_images(&mut itinerary).await;
        Ok(itinerary)
    }

    /// Generate every missing image concurrently and wait for all of them.
    ///
    /// Each task settles to a URL (generated, fallback, or placeholder), so
    /// joining never fails the itinerary.
    async fn fill_missing_images(&self, itinerary: &mut Itinerary) {
        let mut tasks: JoinSet<(ImageSlot, String)> = JoinSet::new();

        if itinerary.image_url.is_none() {
            let prompt = format!("Tourist view of {}, clear sky", itinerary.title);
            tasks.spawn(self.image_task(ImageSlot::Cover, prompt, self.placeholder_cover.clone()));
        }
        for (index, waypoint) in itinerary.waypoints.iter().enumerate() {
            if waypoint.photo_url.is_none() {
                let prompt =
                    format!("Tourist spot {}, type {}", waypoint.name, waypoint.category.as_str());
                tasks.spawn(self.image_task(
                    ImageSlot::Waypoint(index),
                    prompt,
                    self.placeholder_waypoint.clone(),
                ));
            }
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((slot, url)) = joined else { continue };
            match slot {
                ImageSlot::Cover => itinerary.image_url = Some(url),
                ImageSlot::Waypoint(index) => {
                    if let Some(waypoint) = itinerary.waypoints.get_mut(index) {
                        waypoint.photo_url = Some(url);
                    }
                }
            }
        }
    }

    /// One settled image fill: primary prompt, then fallback, then placeholder
    fn image_task(
        &self,
        slot: ImageSlot,
        prompt: String,
        placeholder: String,
    ) -> impl std::future::Future<Output = (ImageSlot, String)> + Send + 'static {
        let images = self.images.clone();
        let metrics = self.metrics.clone();

        async move {
            let url = match generate_image(images.as_ref(), &metrics, &prompt).await {
                Ok(url) => {
                    metrics.record_image_generated();
                    url
                }
                Err(e) => {
                    warn!(slot = ?slot, error = %e, "image_generation_placeholder");
                    metrics.record_image_placeholder();
                    placeholder
                }
            };
            (slot, url)
        }
    }
}

/// Sanitize and run one image generation, with the single fallback attempt
/// the provider gets when it rejects the real prompt.
async fn generate_image(
    images: &dyn ImageGenerator,
    metrics: &Metrics,
    prompt: &str,
) -> Result<String, PipelineError> {
    let sanitized = sanitize_prompt(prompt)?;
    match images.generate(&sanitized, ImageSize::Large).await {
        Ok(url) => Ok(url),
        Err(e) if e.is_rejection() => {
            warn!(error = %e, "image_prompt_rejected_trying_fallback");
            metrics.record_image_fallback();
            images.generate(FALLBACK_PROMPT, ImageSize::Small).await
        }
        Err(e) => Err(e),
    }
}

/// Queue handler: request in, draft itinerary out to the validation queue
pub struct GenerateHandler {
    stage: GenerateStage,
    queue: Arc<QueueClient>,
    validate_queue: String,
}

impl GenerateHandler {
    pub fn new(stage: GenerateStage, queue: Arc<QueueClient>, validate_queue: String) -> Arc<Self> {
        Arc::new(Self { stage, queue, validate_queue })
    }
}

#[async_trait]
impl JobHandler for GenerateHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let job: GenerationJob = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::Parse(format!("generation job: {e}")))?;

        info!(
            request_id = %job.request_id,
            user = %job.user_id,
            place = %job.place.display_name(),
            "generation_job_received"
        );

        let itinerary = self.stage.process(&job).await?;
        info!(
            request_id = %job.request_id,
            title = %itinerary.title,
            waypoints = itinerary.waypoints.len(),
            "itinerary_drafted"
        );

        let next = ItineraryJob {
            request_id: job.request_id,
            place: job.place,
            preferences: job.preferences,
            user_id: job.user_id,
            itinerary,
        };
        self.queue.send(&self.validate_queue, &next).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Text provider returning a fixed reply
    struct FixedText(String);

    #[async_trait]
    impl TextGenerator for FixedText {
        async fn generate(&self, _prompt: &str) -> Result<String, PipelineError> {
            Ok(self.0.clone())
        }
    }

    /// Image provider scripted per call: records prompts, then answers from
    /// a queue of results
    #[derive(Default)]
    struct ScriptedImages {
        prompts: Mutex<Vec<(String, ImageSize)>>,
        script: Mutex<Vec<Result<String, PipelineError>>>,
    }

    impl ScriptedImages {
        fn failing_with_rejection() -> Self {
            let script = vec![
                Err(PipelineError::rejected("images", "bad prompt")),
                Err(PipelineError::provider("images", "fallback down")),
            ];
            Self { prompts: Mutex::new(Vec::new()), script: Mutex::new(script) }
        }

        fn always_ok() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ImageGenerator for ScriptedImages {
        async fn generate(&self, prompt: &str, size: ImageSize) -> Result<String, PipelineError> {
            self.prompts.lock().push((prompt.to_string(), size));
            let mut script = self.script.lock();
            if script.is_empty() {
                Ok(format!("https://img.example/{}.png", self.prompts.lock().len()))
            } else {
                script.remove(0)
            }
        }
    }

    fn provider_reply() -> String {
        r#"Sure! Here is your itinerary:
```json
{
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
            "activities": []
        }
    ]
}
```
Enjoy your trip!"#
            .to_string()
    }

    fn job() -> GenerationJob {
        serde_json::from_str(
            r#"{"requestId": "r-1", "place": {"name": "Palmas", "state": "TO"},
                "preferences": {"types": ["Restaurante"]}, "userId": "u1"}"#,
        )
        .unwrap()
    }

    fn stage(text: &str, images: ScriptedImages) -> GenerateStage {
        GenerateStage::new(
            Arc::new(FixedText(text.to_string())),
            Arc::new(images),
            &ImagesSection::default(),
            Arc::new(Metrics::new()),
        )
    }

    #[test]
    fn test_build_prompt_mentions_place_and_preferences() {
        let job = job();
        let prompt = build_prompt(&job.place, &job.preferences);
        assert!(prompt.contains("Palmas"));
        assert!(prompt.contains("Restaurante"));
        assert!(prompt.contains("\"waypoints\""));
    }

    #[test]
    fn test_extract_json_block() {
        assert_eq!(extract_json_block(r#"text {"a": 1} tail"#), Some(r#"{"a": 1}"#));
        assert_eq!(extract_json_block("no json here"), None);
        assert_eq!(extract_json_block("} backwards {"), None);
        // Nested objects span first-to-last brace
        assert_eq!(
            extract_json_block(r#"{"a": {"b": 2}}"#),
            Some(r#"{"a": {"b": 2}}"#)
        );
    }

    #[test]
    fn test_sanitize_prompt_strips_and_truncates() {
        let sanitized = sanitize_prompt("Tourist spot Praia da Graciosa!!! (beach)").unwrap();
        assert_eq!(sanitized, "Tourist spot Praia da Graciosa beach");

        let long = "a".repeat(800);
        assert_eq!(sanitize_prompt(&long).unwrap().len(), MAX_PROMPT_LEN);
    }

    #[test]
    fn test_sanitize_prompt_fails_fast_when_too_short() {
        let err = sanitize_prompt("!@#$%^&*()").unwrap_err();
        assert!(err.is_rejection());
    }

    #[tokio::test]
    async fn test_process_extracts_itinerary_and_fills_images() {
        let stage = stage(&provider_reply(), ScriptedImages::always_ok());
        let itinerary = stage.process(&job()).await.unwrap();

        assert_eq!(itinerary.title, "A Day in Palmas");
        assert_eq!(itinerary.waypoints.len(), 1);
        // Cover and waypoint photo were both missing and both filled
        assert!(itinerary.image_url.is_some());
        assert!(itinerary.waypoints[0].photo_url.is_some());
    }

    #[tokio::test]
    async fn test_double_image_failure_substitutes_placeholder() {
        let stage = GenerateStage::new(
            Arc::new(FixedText(
                r#"{"title": "T", "location": "L", "rating": 4.0, "reviews": 1,
                   "price": "R$1", "description": "D",
                   "imageUrl": "https://img.example/cover.png",
                   "waypoints": [{"latitude": 1.0, "longitude": 2.0,
                     "name": "Mercado Municipal", "type": "attraction", "activities": []}]}"#
                    .to_string(),
            )),
            Arc::new(ScriptedImages::failing_with_rejection()),
            &ImagesSection::default(),
            Arc::new(Metrics::new()),
        );

        let itinerary = stage.process(&job()).await.unwrap();
        // Cover came from the provider and is untouched; the waypoint image
        // failed twice and got the placeholder
        assert_eq!(itinerary.image_url.as_deref(), Some("https://img.example/cover.png"));
        assert_eq!(
            itinerary.waypoints[0].photo_url.as_deref(),
            Some("https://via.placeholder.com/256")
        );
    }

    #[tokio::test]
    async fn test_rejection_triggers_fallback_prompt_and_size() {
        let images = ScriptedImages {
            prompts: Mutex::new(Vec::new()),
            script: Mutex::new(vec![Err(PipelineError::rejected("images", "nope"))]),
        };
        let metrics = Metrics::new();
        let url = generate_image(&images, &metrics, "Tourist spot Mercado Municipal, type attraction")
            .await
            .unwrap();
        assert!(url.starts_with("https://img.example/"));

        let prompts = images.prompts.lock();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[1].0, FALLBACK_PROMPT);
        assert_eq!(prompts[1].1, ImageSize::Small);
        assert_eq!(prompts[0].1, ImageSize::Large);
    }

    #[tokio::test]
    async fn test_reply_without_json_is_parse_error() {
        let stage = stage("I cannot help with that.", ScriptedImages::always_ok());
        let err = stage.process(&job()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Parse(_)));
    }
}
