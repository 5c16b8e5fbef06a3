//! Wire-format checks through the public protocol API

use iothub_device::config::ConfigError;
use iothub_device::protocol::{
    classify_topic, generate_sas_token, mqtt_username, ConnectionDescriptor, Credentials,
    InboundTopic, TopicBuilder,
};

const KEY_0_TO_31: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

#[test]
fn test_token_matches_known_vector() {
    let descriptor = ConnectionDescriptor::parse(&format!(
        "HostName=h.example;DeviceId=d1;SharedAccessKey={KEY_0_TO_31}"
    ))
    .unwrap();
    let credentials = Credentials::derive(&descriptor, 1_700_000_000).unwrap();

    assert_eq!(
        credentials.token(),
        "SharedAccessSignature sr=h.example%2Fdevices%2Fd1\
         &sig=YTPi5zgRpNCR%2BToglgYgIlIgbdT8blNmIQQdoLIsIGY%3D&se=1700000000"
    );
    assert_eq!(
        credentials.token(),
        generate_sas_token("h.example", "d1", KEY_0_TO_31, 1_700_000_000).unwrap()
    );
}

#[test]
fn test_token_changes_with_expiry_and_device() {
    let base = generate_sas_token("h.example", "d1", KEY_0_TO_31, 1_700_000_000).unwrap();
    let later = generate_sas_token("h.example", "d1", KEY_0_TO_31, 1_700_000_001).unwrap();
    let other = generate_sas_token("h.example", "d2", KEY_0_TO_31, 1_700_000_000).unwrap();

    assert_ne!(base, later);
    assert_ne!(base, other);
}

#[test]
fn test_connection_string_key_order_and_extras() {
    let descriptor = ConnectionDescriptor::parse(
        "SharedAccessKey=a2V5;GatewayHostName=edge;DeviceId=d1;HostName=h.example;",
    )
    .unwrap();

    assert_eq!(descriptor.host(), "h.example");
    assert_eq!(descriptor.device_id(), "d1");
    assert_eq!(descriptor.shared_key(), "a2V5");
    assert_eq!(
        descriptor.to_connection_string(),
        "HostName=h.example;DeviceId=d1;SharedAccessKey=a2V5"
    );
}

#[test]
fn test_connection_string_errors() {
    assert!(matches!(
        ConnectionDescriptor::parse("DeviceId=d1;SharedAccessKey=a2V5"),
        Err(ConfigError::MissingKey("HostName"))
    ));
    assert!(matches!(
        ConnectionDescriptor::parse("HostName=;DeviceId=d1;SharedAccessKey=a2V5"),
        Err(ConfigError::EmptyValue("HostName"))
    ));
    let long_id = "d".repeat(64);
    assert!(matches!(
        ConnectionDescriptor::parse(&format!("HostName=h;DeviceId={long_id};SharedAccessKey=a2V5")),
        Err(ConfigError::ValueTooLong { key: "DeviceId", max: 63 })
    ));
}

#[test]
fn test_descriptor_debug_hides_key() {
    let descriptor =
        ConnectionDescriptor::parse("HostName=h;DeviceId=d;SharedAccessKey=c2VjcmV0").unwrap();
    assert!(!format!("{descriptor:?}").contains("c2VjcmV0"));
}

#[test]
fn test_outbound_topics() {
    assert_eq!(mqtt_username("h.example", "d1"), "h.example/d1/?api-version=2021-04-12");
    assert_eq!(
        TopicBuilder::telemetry_topic("d1", Some("a=1&b=2")),
        "devices/d1/messages/events/a=1&b=2"
    );
    assert_eq!(TopicBuilder::telemetry_topic("d1", Some("")), "devices/d1/messages/events/");
    assert_eq!(TopicBuilder::twin_get_topic(42), "$iothub/twin/GET/?$rid=42");
    assert_eq!(
        TopicBuilder::reported_patch_topic(7),
        "$iothub/twin/PATCH/properties/reported/?$rid=7"
    );
}

#[test]
fn test_inbound_classification() {
    assert_eq!(
        classify_topic("devices/d1/messages/devicebound/%24.mid=1"),
        InboundTopic::C2d
    );
    assert_eq!(
        classify_topic("$iothub/twin/res/200/?$rid=12"),
        InboundTopic::TwinResponse { status: 200, rid: Some(12) }
    );
    assert_eq!(
        classify_topic("$iothub/twin/PATCH/properties/desired/?$version=9"),
        InboundTopic::DesiredPatch { version: 9 }
    );
    assert_eq!(classify_topic("devices/d1/messages/events/"), InboundTopic::Unknown);
}
