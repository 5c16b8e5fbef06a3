//! IoT hub device client
//!
//! Connects a device to an IoT hub over MQTT 3.1.1 with TLS, authenticating
//! with a shared access signature derived from the device connection string.
//! Supports device-to-cloud telemetry, cloud-to-device messages and the
//! device twin (full GET, reported PATCH, desired-property notifications).
//!
//! # Quick Start
//!
//! ```rust
//! use iothub_device::protocol::{ConnectionDescriptor, Credentials, TopicBuilder};
//!
//! let descriptor = ConnectionDescriptor::parse(
//!     "HostName=my-hub.azure-devices.net;DeviceId=sensor-1;SharedAccessKey=AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=",
//! )
//! .unwrap();
//! let credentials = Credentials::derive(&descriptor, 1_700_000_000).unwrap();
//!
//! assert_eq!(credentials.client_id(), "sensor-1");
//! assert!(credentials.token().starts_with("SharedAccessSignature sr=my-hub.azure-devices.net%2Fdevices%2Fsensor-1&sig="));
//! assert_eq!(
//!     TopicBuilder::telemetry_topic("sensor-1", None),
//!     "devices/sensor-1/messages/events/"
//! );
//! ```
//!
//! A running client is driven from one task:
//!
//! ```rust,no_run
//! use iothub_device::{HubConfig, IotHubClient};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HubConfig::with_connection_string(std::env::var("IOTHUB_DEVICE_CONNECTION_STRING")?);
//! let mut client = IotHubClient::from_config(config);
//! client.init().await?;
//! client.set_desired_observer(|session, patch| {
//!     let _ = session.update_reported(patch.payload);
//! });
//! client.connect().await?;
//! loop {
//!     client.poll().await;
//!     client.send_telemetry(br#"{"temperature":21.5}"#, None).ok();
//! }
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hub;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use config::HubConfig;
pub use error::{HubError, HubResult};
pub use hub::{HubSession, IotHubClient, SessionState};
pub use protocol::{ConnectionDescriptor, Credentials};
pub use transport::{MqttState, Transport};
