//! Image generation provider
//!
//! Covers and waypoint photos that the text provider did not supply are
//! filled by an images REST endpoint. A 400-class response is surfaced as a
//! *rejection* so the generation stage can retry once with its generic
//! fallback prompt before settling for a placeholder.

use crate::infra::config::{api_key_from_env, ImagesSection};
use crate::infra::error::PipelineError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Requested image dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSize {
    /// 512x512 - covers and waypoint photos
    Large,
    /// 256x256 - the fallback attempt
    Small,
}

impl ImageSize {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::Large => "512x512",
            ImageSize::Small => "256x256",
        }
    }
}

/// Image generation from a text prompt, returning a hosted URL.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<String, PipelineError>;
}

// Compile-time assertion: ImageGenerator must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ImageGenerator) {}
};

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Debug, Deserialize)]
struct ImageDatum {
    #[serde(default)]
    url: Option<String>,
}

/// REST images client (OpenAI-style generations endpoint)
pub struct ImageApiClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl ImageApiClient {
    pub fn from_config(section: &ImagesSection) -> Result<Self, PipelineError> {
        let api_key = api_key_from_env(&section.api_key_env).ok_or_else(|| {
            PipelineError::provider("images", format!("{} not set", section.api_key_env))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(section.timeout_ms))
            .build()
            .map_err(|e| PipelineError::provider("images", e.to_string()))?;

        Ok(Self { http, api_url: section.api_url.clone(), api_key })
    }
}

#[async_trait]
impl ImageGenerator for ImageApiClient {
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "prompt": prompt,
            "n": 1,
            "size": size.as_str(),
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::provider("images", e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            let message = response.text().await.unwrap_or_default();
            return Err(PipelineError::rejected(
                "images",
                format!("status {status}: {message}"),
            ));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PipelineError::provider(
                "images",
                format!("status {status}: {message}"),
            ));
        }

        let parsed: ImagesResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::provider("images", e.to_string()))?;

        let url = parsed
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| PipelineError::provider("images", "no url in response"))?;

        debug!(size = size.as_str(), "image_generated");
        Ok(url)
    }
}
