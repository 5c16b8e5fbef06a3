//! IoT hub wire protocol: identity, credentials and topics
//!
//! Everything here is pure; no I/O happens in this module.

pub mod connection_string;
pub mod sas;
pub mod topics;

pub use connection_string::ConnectionDescriptor;
pub use sas::{generate_sas_token, mqtt_username, url_encode, Credentials, CryptoError};
pub use topics::{classify_topic, InboundTopic, TopicBuilder};
