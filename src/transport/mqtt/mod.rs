//! MQTT-over-TLS session to the IoT hub
//!
//! Split the same way as the rest of the transport code: pure pieces first,
//! I/O last.
//!
//! - [`connection`] - session state codes, retry policy and option building
//! - [`message_handler`] - pure event loop event routing
//! - [`tls`] - trust store, insecure fallback and the handshake probe
//! - [`client`] - the [`MqttSession`] transport itself
//!
//! # Usage
//!
//! ```rust,no_run
//! use iothub_device::config::{MqttSection, TlsSection};
//! use iothub_device::transport::{MqttSession, Transport};
//!
//! # tokio_test::block_on(async {
//! let mut session = MqttSession::new(MqttSection::default(), TlsSection::default());
//! session.probe("my-hub.azure-devices.net").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;
pub mod tls;

pub use client::MqttSession;
pub use connection::{configure_mqtt_options, publish_packet_size, MqttState, RetryPolicy};
pub use message_handler::{EventRoute, MessageHandler};
