//! Integration tests for configuration loading

use itinerary_pipeline::infra::Config;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[broker]
host = "mq.test"
port = 1884
embedded = false

[queues]
generate = "test/generate"
validate = "test/validate"
complete = "test/complete"
ready = "test/ready"
max_redeliveries = 2

[server]
http_port = 8080
notify_port = 8081

[storage]
api_url = "http://storage.test/rest/v1"
table = "test_itineraries"

[metrics]
interval_secs = 5
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.broker_host(), "mq.test");
    assert_eq!(config.broker_port(), 1884);
    assert!(!config.broker_embedded());
    assert_eq!(config.generate_queue(), "test/generate");
    assert_eq!(config.ready_topic(), "test/ready");
    assert_eq!(config.max_redeliveries(), 2);
    assert_eq!(config.http_port(), 8080);
    assert_eq!(config.notify_port(), 8081);
    assert_eq!(config.storage().table, "test_itineraries");
    assert_eq!(config.metrics_interval_secs(), 5);

    // Sections absent from the file keep their defaults
    assert_eq!(config.dead_letter_topic(), "itinerary/dead-letter");
    assert_eq!(config.textgen().model, "gemini-2.0-flash");
    assert_eq!(config.places().photo_max_width, 400);
}

#[test]
fn test_load_falls_back_to_defaults_on_missing_file() {
    let config = Config::load("/nonexistent/path/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.broker_host(), "localhost");
    assert_eq!(config.generate_queue(), "itinerary/generate");
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[broker\nhost = ").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}
