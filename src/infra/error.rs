//! Pipeline error taxonomy
//!
//! Four failure classes with distinct handling:
//! - `Transport` stays inside the reliability layer (reconnect/backoff)
//! - `Parse` and `Storage` requeue the message for redelivery
//! - `Provider` degrades in place (placeholder image, pass-through waypoint)
//!   and only escapes a stage when the text provider itself is down

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Broker or socket unreachable
    #[error("transport: {0}")]
    Transport(String),

    /// Generation output contained no parseable itinerary
    #[error("parse: {0}")]
    Parse(String),

    /// An external provider call failed
    #[error("provider {provider}: {message}")]
    Provider {
        provider: &'static str,
        message: String,
        /// True when the provider rejected the request itself (bad prompt)
        /// rather than failing to serve it. The image path uses this to pick
        /// between the fallback attempt and the placeholder.
        rejected: bool,
    },

    /// Durable storage write or lookup failed
    #[error("storage: {0}")]
    Storage(String),
}

impl PipelineError {
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider { provider, message: message.into(), rejected: false }
    }

    pub fn rejected(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider { provider, message: message.into(), rejected: true }
    }

    /// Whether this error is a provider-side rejection of the request
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Provider { rejected: true, .. })
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_flag() {
        let rejected = PipelineError::rejected("images", "prompt refused");
        assert!(rejected.is_rejection());

        let failed = PipelineError::provider("images", "503");
        assert!(!failed.is_rejection());

        let parse = PipelineError::Parse("no json block".to_string());
        assert!(!parse.is_rejection());
    }

    #[test]
    fn test_display_includes_provider_name() {
        let err = PipelineError::provider("places", "quota exceeded");
        assert_eq!(err.to_string(), "provider places: quota exceeded");
    }
}
