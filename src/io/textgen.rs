//! Text generation provider
//!
//! The generation stage talks to the provider through the [`TextGenerator`]
//! trait so tests can swap in canned output. The shipped implementation
//! calls a Gemini-style `generateContent` REST endpoint.

use crate::infra::config::{api_key_from_env, TextGenSection};
use crate::infra::error::PipelineError;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Free-form text generation.
///
/// Object-safe so stages can hold `Arc<dyn TextGenerator>`.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for a prompt. The output is free-form; callers extract
    /// whatever structure they asked the model for.
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError>;
}

// Compile-time assertion: TextGenerator must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn TextGenerator) {}
};

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: String,
}

/// Gemini-style REST client
pub struct GeminiClient {
    http: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn from_config(section: &TextGenSection) -> Result<Self, PipelineError> {
        let api_key = api_key_from_env(&section.api_key_env).ok_or_else(|| {
            PipelineError::provider("textgen", format!("{} not set", section.api_key_env))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(section.timeout_ms))
            .build()
            .map_err(|e| PipelineError::provider("textgen", e.to_string()))?;

        Ok(Self {
            http,
            api_url: section.api_url.clone(),
            model: section.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, PipelineError> {
        let url = format!("{}/{}:generateContent?key={}", self.api_url, self.model, self.api_key);
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::provider("textgen", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PipelineError::provider(
                "textgen",
                format!("status {status}: {message}"),
            ));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::provider("textgen", e.to_string()))?;

        let text: String = parsed
            .candidates
            .first()
            .map(|c| c.content.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(PipelineError::provider("textgen", "empty response"));
        }

        debug!(chars = text.len(), "textgen_response_received");
        Ok(text)
    }
}
