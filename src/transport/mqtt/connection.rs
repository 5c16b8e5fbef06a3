//! Pure connection state management for the MQTT session
//!
//! Session state codes, retry policy and `MqttOptions` construction. Nothing
//! in here touches the network.

use crate::config::{MqttSection, MAX_INBOUND_PACKET_BYTES};
use crate::protocol::Credentials;
use rumqttc::{ConnectReturnCode, ConnectionError, MqttOptions, TlsConfiguration, Transport};
use rustls::ClientConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// MQTT session state with the conventional numeric codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MqttState {
    /// No CONNACK within the socket timeout (-4)
    ConnectionTimeout,
    /// Established session dropped (-3)
    ConnectionLost,
    /// TCP or TLS setup failed (-2)
    ConnectFailed,
    /// Not connected (-1)
    Disconnected,
    /// CONNACK accepted (0)
    Connected,
    /// Refused: unacceptable protocol version (1)
    BadProtocol,
    /// Refused: identifier rejected (2)
    BadClientId,
    /// Refused: server unavailable (3)
    Unavailable,
    /// Refused: bad user name or password (4)
    BadCredentials,
    /// Refused: not authorized (5)
    Unauthorized,
}

impl MqttState {
    pub fn code(self) -> i8 {
        match self {
            MqttState::ConnectionTimeout => -4,
            MqttState::ConnectionLost => -3,
            MqttState::ConnectFailed => -2,
            MqttState::Disconnected => -1,
            MqttState::Connected => 0,
            MqttState::BadProtocol => 1,
            MqttState::BadClientId => 2,
            MqttState::Unavailable => 3,
            MqttState::BadCredentials => 4,
            MqttState::Unauthorized => 5,
        }
    }

    /// Map a CONNACK return code
    pub fn from_return_code(code: ConnectReturnCode) -> Self {
        match code {
            ConnectReturnCode::Success => MqttState::Connected,
            ConnectReturnCode::RefusedProtocolVersion => MqttState::BadProtocol,
            ConnectReturnCode::BadClientId => MqttState::BadClientId,
            ConnectReturnCode::ServiceUnavailable => MqttState::Unavailable,
            ConnectReturnCode::BadUserNamePassword => MqttState::BadCredentials,
            ConnectReturnCode::NotAuthorized => MqttState::Unauthorized,
        }
    }

    /// Classify an event loop error seen while waiting for CONNACK
    pub fn from_connect_error(error: &ConnectionError) -> Self {
        match error {
            ConnectionError::ConnectionRefused(code) => Self::from_return_code(*code),
            ConnectionError::NetworkTimeout => MqttState::ConnectionTimeout,
            _ => MqttState::ConnectFailed,
        }
    }
}

impl fmt::Display for MqttState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MqttState::ConnectionTimeout => "connection timeout",
            MqttState::ConnectionLost => "connection lost",
            MqttState::ConnectFailed => "connect failed",
            MqttState::Disconnected => "disconnected",
            MqttState::Connected => "connected",
            MqttState::BadProtocol => "bad protocol",
            MqttState::BadClientId => "bad client id",
            MqttState::Unavailable => "unavailable",
            MqttState::BadCredentials => "bad credentials",
            MqttState::Unauthorized => "unauthorized",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// Fixed-delay connect retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &MqttSection) -> Self {
        Self {
            max_attempts: config.connect_retries,
            delay: Duration::from_millis(config.connect_backoff_ms),
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    /// `None` once the budget is spent; no sleep follows the last attempt.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.max_attempts).then_some(self.delay)
    }
}

/// Build the session options for one connect attempt
///
/// Client id is the device id, the username carries the API version and the
/// SAS token is the password. Clean session is on and there is no will.
pub fn configure_mqtt_options(
    host: &str,
    credentials: &Credentials,
    config: &MqttSection,
    tls_config: Arc<ClientConfig>,
) -> MqttOptions {
    let mut mqtt_options = MqttOptions::new(credentials.client_id(), host, config.port);

    mqtt_options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
        tls_config,
    )));
    mqtt_options.set_credentials(credentials.username(), credentials.token());
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_session(true);
    // inbound is bounded by the dispatcher's payload buffer, not by the codec
    mqtt_options.set_max_packet_size(MAX_INBOUND_PACKET_BYTES, config.buffer_bytes);

    mqtt_options
}

/// Encoded size of a QoS 0 PUBLISH: fixed header, remaining-length varint,
/// topic length prefix, topic and payload
pub fn publish_packet_size(topic: &str, payload_len: usize) -> usize {
    let remaining = 2 + topic.len() + payload_len;
    let length_bytes = match remaining {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    };
    1 + length_bytes + remaining
}
