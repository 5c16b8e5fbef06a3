//! Transport layer for the IoT hub session
//!
//! The hub client talks to the network only through [`Transport`], so the
//! MQTT-over-TLS implementation can be swapped for a mock in tests.

use crate::protocol::Credentials;
use bytes::Bytes;
use thiserror::Error;

pub mod mqtt;

pub use mqtt::{MqttSession, MqttState};

/// A publish received from the hub, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new<T: Into<String>, P: Into<Bytes>>(topic: T, payload: P) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// How the server certificate is checked for this session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsMode {
    /// Chain verified against the pinned (or configured) root
    Verified,
    /// Verification disabled after a failed probe
    Insecure,
}

/// Transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("TLS error: {0}")]
    Tls(String),
    #[error("Connect refused, state {0}")]
    Connect(MqttState),
    #[error("Not connected")]
    NotConnected,
    #[error("Request rejected: {0}")]
    Request(String),
}

/// Session transport used by the hub client
///
/// All operations are driven from a single task. `subscribe` and `publish`
/// only enqueue; the packets go out on the next [`Transport::pump`].
#[async_trait::async_trait]
pub trait Transport: Send {
    /// One TLS handshake against `host` to validate the trust chain.
    /// Stores the TLS settings used for later connects.
    async fn probe(&mut self, host: &str) -> Result<TlsMode, TransportError>;

    /// Open a fresh MQTT session and wait for CONNACK
    async fn connect(&mut self, host: &str, credentials: &Credentials)
        -> Result<(), TransportError>;

    /// Enqueue a QoS 0 subscribe
    fn subscribe(&mut self, filter: &str) -> Result<(), TransportError>;

    /// Enqueue a QoS 0, non-retained publish
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Drive the network: flush queued requests and collect inbound publishes
    async fn pump(&mut self) -> Result<Vec<InboundMessage>, TransportError>;

    fn is_connected(&self) -> bool;

    /// Last observed session state
    fn state(&self) -> MqttState;

    /// Best-effort DISCONNECT; the transport is idle afterwards
    async fn disconnect(&mut self);
}
