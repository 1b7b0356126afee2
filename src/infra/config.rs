//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Provider API keys are never stored in the file; each provider section
//! names the environment variable the key is read from at client
//! construction time.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerSection {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Run the embedded broker inside pipeline-server (development setups)
    #[serde(default = "default_broker_embedded")]
    pub embedded: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_broker_embedded() -> bool {
    true
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            embedded: default_broker_embedded(),
            bind_address: default_broker_bind_address(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueuesSection {
    #[serde(default = "default_generate_queue")]
    pub generate: String,
    #[serde(default = "default_validate_queue")]
    pub validate: String,
    #[serde(default = "default_complete_queue")]
    pub complete: String,
    /// Transient topic carrying ready events to the server
    #[serde(default = "default_ready_topic")]
    pub ready: String,
    /// Terminal topic for messages that exhausted their redelivery budget
    #[serde(default = "default_dead_letter_topic")]
    pub dead_letter: String,
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
}

fn default_generate_queue() -> String {
    "itinerary/generate".to_string()
}

fn default_validate_queue() -> String {
    "itinerary/validate".to_string()
}

fn default_complete_queue() -> String {
    "itinerary/complete".to_string()
}

fn default_ready_topic() -> String {
    "itinerary/ready".to_string()
}

fn default_dead_letter_topic() -> String {
    "itinerary/dead-letter".to_string()
}

fn default_max_redeliveries() -> u32 {
    5
}

impl Default for QueuesSection {
    fn default() -> Self {
        Self {
            generate: default_generate_queue(),
            validate: default_validate_queue(),
            complete: default_complete_queue(),
            ready: default_ready_topic(),
            dead_letter: default_dead_letter_topic(),
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_notify_port")]
    pub notify_port: u16,
}

fn default_http_port() -> u16 {
    3000
}

fn default_notify_port() -> u16 {
    3001
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { http_port: default_http_port(), notify_port: default_notify_port() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextGenSection {
    #[serde(default = "default_textgen_url")]
    pub api_url: String,
    #[serde(default = "default_textgen_model")]
    pub model: String,
    #[serde(default = "default_textgen_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_textgen_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/models".to_string()
}

fn default_textgen_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_textgen_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_provider_timeout_ms() -> u64 {
    60_000
}

impl Default for TextGenSection {
    fn default() -> Self {
        Self {
            api_url: default_textgen_url(),
            model: default_textgen_model(),
            api_key_env: default_textgen_key_env(),
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesSection {
    #[serde(default = "default_images_url")]
    pub api_url: String,
    #[serde(default = "default_images_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_placeholder_cover")]
    pub placeholder_cover: String,
    #[serde(default = "default_placeholder_waypoint")]
    pub placeholder_waypoint: String,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_images_url() -> String {
    "https://api.openai.com/v1/images/generations".to_string()
}

fn default_images_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_placeholder_cover() -> String {
    "https://via.placeholder.com/512".to_string()
}

fn default_placeholder_waypoint() -> String {
    "https://via.placeholder.com/256".to_string()
}

impl Default for ImagesSection {
    fn default() -> Self {
        Self {
            api_url: default_images_url(),
            api_key_env: default_images_key_env(),
            placeholder_cover: default_placeholder_cover(),
            placeholder_waypoint: default_placeholder_waypoint(),
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlacesSection {
    #[serde(default = "default_places_url")]
    pub api_url: String,
    #[serde(default = "default_places_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_photo_max_width")]
    pub photo_max_width: u32,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_places_url() -> String {
    "https://maps.googleapis.com/maps/api/place".to_string()
}

fn default_places_key_env() -> String {
    "GOOGLE_PLACES_API_KEY".to_string()
}

fn default_photo_max_width() -> u32 {
    400
}

impl Default for PlacesSection {
    fn default() -> Self {
        Self {
            api_url: default_places_url(),
            api_key_env: default_places_key_env(),
            photo_max_width: default_photo_max_width(),
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_url")]
    pub api_url: String,
    #[serde(default = "default_storage_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_storage_table")]
    pub table: String,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_storage_url() -> String {
    "http://localhost:54321/rest/v1".to_string()
}

fn default_storage_key_env() -> String {
    "STORAGE_API_KEY".to_string()
}

fn default_storage_table() -> String {
    "itineraries".to_string()
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            api_url: default_storage_url(),
            api_key_env: default_storage_key_env(),
            table: default_storage_table(),
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsSection {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    30
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub queues: QueuesSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub textgen: TextGenSection,
    #[serde(default)]
    pub images: ImagesSection,
    #[serde(default)]
    pub places: PlacesSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub metrics: MetricsSection,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone, Default)]
pub struct Config {
    broker: BrokerSection,
    queues: QueuesSection,
    server: ServerSection,
    textgen: TextGenSection,
    images: ImagesSection,
    places: PlacesSection,
    storage: StorageSection,
    metrics: MetricsSection,
    config_file: String,
}

impl Config {
    /// Determine config file path from an explicit arg or environment
    pub fn resolve_config_path(arg: Option<&str>) -> String {
        if let Some(path) = arg {
            return path.to_string();
        }
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }
        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            broker: toml_config.broker,
            queues: toml_config.queues,
            server: toml_config.server,
            textgen: toml_config.textgen,
            images: toml_config.images,
            places: toml_config.places,
            storage: toml_config.storage,
            metrics: toml_config.metrics,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self { config_file: "default".to_string(), ..Self::default() }
            }
        }
    }

    // Getters for all config fields
    pub fn broker_host(&self) -> &str {
        &self.broker.host
    }

    pub fn broker_port(&self) -> u16 {
        self.broker.port
    }

    pub fn broker_embedded(&self) -> bool {
        self.broker.embedded
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker.bind_address
    }

    pub fn broker_username(&self) -> Option<&str> {
        self.broker.username.as_deref()
    }

    pub fn broker_password(&self) -> Option<&str> {
        self.broker.password.as_deref()
    }

    pub fn generate_queue(&self) -> &str {
        &self.queues.generate
    }

    pub fn validate_queue(&self) -> &str {
        &self.queues.validate
    }

    pub fn complete_queue(&self) -> &str {
        &self.queues.complete
    }

    pub fn ready_topic(&self) -> &str {
        &self.queues.ready
    }

    pub fn dead_letter_topic(&self) -> &str {
        &self.queues.dead_letter
    }

    pub fn max_redeliveries(&self) -> u32 {
        self.queues.max_redeliveries
    }

    pub fn http_port(&self) -> u16 {
        self.server.http_port
    }

    pub fn notify_port(&self) -> u16 {
        self.server.notify_port
    }

    pub fn textgen(&self) -> &TextGenSection {
        &self.textgen
    }

    pub fn images(&self) -> &ImagesSection {
        &self.images
    }

    pub fn places(&self) -> &PlacesSection {
        &self.places
    }

    pub fn storage(&self) -> &StorageSection {
        &self.storage
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics.interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

/// Read a provider API key from the environment variable a section names
pub fn api_key_from_env(env_var: &str) -> Option<String> {
    env::var(env_var).ok().filter(|k| !k.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.broker_host(), "localhost");
        assert_eq!(config.broker_port(), 1883);
        assert_eq!(config.generate_queue(), "itinerary/generate");
        assert_eq!(config.validate_queue(), "itinerary/validate");
        assert_eq!(config.complete_queue(), "itinerary/complete");
        assert_eq!(config.ready_topic(), "itinerary/ready");
        assert_eq!(config.max_redeliveries(), 5);
        assert_eq!(config.http_port(), 3000);
        assert_eq!(config.notify_port(), 3001);
        assert_eq!(config.storage().table, "itineraries");
        assert_eq!(config.places().photo_max_width, 400);
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/prod.toml")), "config/prod.toml");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [broker]
            host = "mq.internal"
            embedded = false

            [queues]
            max_redeliveries = 3
            "#,
        )
        .unwrap();

        assert_eq!(toml_config.broker.host, "mq.internal");
        assert!(!toml_config.broker.embedded);
        assert_eq!(toml_config.broker.port, 1883);
        assert_eq!(toml_config.queues.max_redeliveries, 3);
        assert_eq!(toml_config.queues.generate, "itinerary/generate");
        assert_eq!(toml_config.images.placeholder_cover, "https://via.placeholder.com/512");
    }

    #[test]
    fn test_api_key_from_env_filters_empty() {
        env::set_var("PIPELINE_TEST_KEY", "");
        assert_eq!(api_key_from_env("PIPELINE_TEST_KEY"), None);
        env::set_var("PIPELINE_TEST_KEY", "secret");
        assert_eq!(api_key_from_env("PIPELINE_TEST_KEY"), Some("secret".to_string()));
        env::remove_var("PIPELINE_TEST_KEY");
    }
}
