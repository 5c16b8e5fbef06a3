//! Tests for logging configuration and format parsing

use iothub_device::observability::{LogFormat, LogSettings};
use std::collections::HashMap;
use tracing::Level;

fn settings_from(pairs: &[(&str, &str)]) -> LogSettings {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    LogSettings::from_lookup(|key| vars.get(key).cloned())
}

#[test]
fn test_log_format_parse() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("Compact"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    assert_eq!(LogFormat::parse("invalid"), LogFormat::Json);
    assert_eq!(LogFormat::parse(""), LogFormat::Json);
    assert_eq!(LogFormat::parse("xml"), LogFormat::Json);
}

#[test]
fn test_defaults_without_environment() {
    let settings = settings_from(&[]);

    assert_eq!(settings.level, Level::INFO);
    assert_eq!(settings.format, LogFormat::Json);
    assert!(!settings.include_spans);
    assert_eq!(settings.directives, None);
}

#[test]
fn test_environment_overrides() {
    let settings = settings_from(&[
        ("LOG_LEVEL", "debug"),
        ("LOG_FORMAT", "compact"),
        ("LOG_SPANS", "TRUE"),
    ]);

    assert_eq!(settings.level, Level::DEBUG);
    assert_eq!(settings.format, LogFormat::Compact);
    assert!(settings.include_spans);
}

#[test]
fn test_rust_log_replaces_level_filter() {
    let settings = settings_from(&[("LOG_LEVEL", "error"), ("RUST_LOG", "iothub_device=trace")]);

    let filter = settings.env_filter().to_string().to_lowercase();
    assert!(filter.contains("iothub_device=trace"));
    assert!(!filter.contains("rumqttc"));
}

#[test]
fn test_level_filter_quiets_transport_crates() {
    let settings = settings_from(&[("LOG_LEVEL", "trace")]);

    let filter = settings.env_filter().to_string().to_lowercase();
    assert!(filter.contains("rumqttc=warn"));
    assert!(filter.contains("rustls=warn"));
}
