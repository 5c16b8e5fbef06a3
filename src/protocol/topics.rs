//! Topic taxonomy for the IoT hub MQTT surface
//!
//! Builds the byte-exact outbound topics and subscription filters, and
//! classifies inbound topics into exactly one [`InboundTopic`] class.

/// Marker that identifies a cloud-to-device message anywhere in a topic
pub const C2D_MARKER: &str = "/messages/devicebound/";
/// Prefix of every twin response topic
pub const TWIN_RESPONSE_PREFIX: &str = "$iothub/twin/res/";
/// Prefix of desired-property patch notifications
pub const DESIRED_PATCH_PREFIX: &str = "$iothub/twin/PATCH/properties/desired/";
/// Subscription filter for twin responses
pub const TWIN_RESPONSE_FILTER: &str = "$iothub/twin/res/#";
/// Subscription filter for desired-property patches
pub const DESIRED_PATCH_FILTER: &str = "$iothub/twin/PATCH/properties/desired/#";

const VERSION_KEY: &str = "$version=";
const RID_KEY: &str = "$rid=";

/// Twin response status: full document returned for a GET
pub const STATUS_OK: u16 = 200;
/// Twin response status: reported-property PATCH accepted
pub const STATUS_NO_CONTENT: u16 = 204;

/// Classification of an inbound topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic {
    /// Cloud-to-device message
    C2d,
    /// Response to a twin GET or PATCH
    TwinResponse { status: u16, rid: Option<u32> },
    /// Desired-properties patch pushed by the hub
    DesiredPatch { version: u32 },
    /// Anything else
    Unknown,
}

/// Outbound topic construction
pub struct TopicBuilder;

impl TopicBuilder {
    /// Telemetry topic: `devices/{device_id}/messages/events/{properties}`
    ///
    /// `properties` is an already-encoded `k=v&k=v` sequence appended verbatim.
    pub fn telemetry_topic(device_id: &str, properties: Option<&str>) -> String {
        match properties {
            Some(props) if !props.is_empty() => {
                format!("devices/{device_id}/messages/events/{props}")
            }
            _ => format!("devices/{device_id}/messages/events/"),
        }
    }

    /// Twin GET topic: `$iothub/twin/GET/?$rid={rid}`
    pub fn twin_get_topic(rid: u32) -> String {
        format!("$iothub/twin/GET/?$rid={rid}")
    }

    /// Reported PATCH topic: `$iothub/twin/PATCH/properties/reported/?$rid={rid}`
    pub fn reported_patch_topic(rid: u32) -> String {
        format!("$iothub/twin/PATCH/properties/reported/?$rid={rid}")
    }

    /// C2D wildcard filter: `devices/{device_id}/messages/devicebound/#`
    pub fn c2d_filter(device_id: &str) -> String {
        format!("devices/{device_id}/messages/devicebound/#")
    }

    /// The three subscription filters, in subscribe order
    pub fn subscription_filters(device_id: &str) -> [String; 3] {
        [
            Self::c2d_filter(device_id),
            TWIN_RESPONSE_FILTER.to_string(),
            DESIRED_PATCH_FILTER.to_string(),
        ]
    }
}

/// Classify an inbound topic. The checks run in a fixed order so every topic
/// lands in exactly one class.
pub fn classify_topic(topic: &str) -> InboundTopic {
    if topic.contains(C2D_MARKER) {
        return InboundTopic::C2d;
    }

    if let Some(rest) = topic.strip_prefix(TWIN_RESPONSE_PREFIX) {
        let status = leading_number(rest).unwrap_or(0);
        let rid = query_value(rest, RID_KEY).and_then(leading_number);
        return InboundTopic::TwinResponse {
            status: u16::try_from(status).unwrap_or(0),
            rid,
        };
    }

    if topic.starts_with(DESIRED_PATCH_PREFIX) {
        let version = query_value(topic, VERSION_KEY)
            .and_then(leading_number)
            .unwrap_or(0);
        return InboundTopic::DesiredPatch { version };
    }

    InboundTopic::Unknown
}

/// Text following the first occurrence of `key`
fn query_value<'a>(topic: &'a str, key: &str) -> Option<&'a str> {
    topic.find(key).map(|idx| &topic[idx + key.len()..])
}

/// Parse the run of ASCII digits at the start of `text`
fn leading_number(text: &str) -> Option<u32> {
    let end = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    text[..end].parse().ok()
}
