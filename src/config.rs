//! Configuration for the IoT hub device client
//!
//! Wire-level constants live here as `pub const`s. The runtime configuration is
//! a TOML file whose sections are all optional; every default equals the
//! corresponding constant. The device connection string is either inline or
//! read from an environment variable (persistent storage is outside this crate).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// IoT hub MQTT API version carried in the CONNECT username
pub const API_VERSION: &str = "2021-04-12";
/// MQTT over TLS port
pub const PORT: u16 = 8883;
/// SAS token lifetime (24 hours)
pub const SAS_LIFETIME_SECONDS: u64 = 86_400;
pub const KEEPALIVE_SECONDS: u64 = 60;
pub const SOCKET_TIMEOUT_SECONDS: u64 = 30;
pub const MQTT_BUFFER_BYTES: usize = 1024;
pub const CONNECT_RETRIES: u32 = 5;
pub const CONNECT_BACKOFF_MS: u64 = 3000;
/// Size of the inbound payload buffer, including the terminator slot
pub const PAYLOAD_BUFFER_BYTES: usize = 1024;
/// Largest inbound packet the MQTT codec accepts. Observers still see at most
/// `PAYLOAD_BUFFER_BYTES - 1` payload bytes.
pub const MAX_INBOUND_PACKET_BYTES: usize = 256 * 1024;

/// Default environment variable holding the device connection string
pub const DEFAULT_CONNECTION_STRING_ENV: &str = "IOTHUB_DEVICE_CONNECTION_STRING";

/// Top-level client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HubConfig {
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub time: TimeSection,
}

/// Where the device connection string comes from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HubSection {
    /// Inline connection string; takes precedence over the environment
    pub connection_string: Option<String>,
    /// Environment variable containing the connection string
    #[serde(default = "default_connection_string_env")]
    pub connection_string_env: String,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            connection_string: None,
            connection_string_env: default_connection_string_env(),
        }
    }
}

fn default_connection_string_env() -> String {
    DEFAULT_CONNECTION_STRING_ENV.to_string()
}

/// MQTT session settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttSection {
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Bound on TCP connect, TLS handshake and CONNACK wait
    pub socket_timeout_secs: u64,
    /// Maximum outgoing MQTT packet size
    pub buffer_bytes: usize,
    pub connect_retries: u32,
    pub connect_backoff_ms: u64,
    /// How long one `poll()` waits for the first network event
    pub poll_timeout_ms: u64,
    /// Outgoing request queue depth between the client handle and the event loop
    pub request_queue_capacity: usize,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            port: PORT,
            keep_alive_secs: KEEPALIVE_SECONDS,
            socket_timeout_secs: SOCKET_TIMEOUT_SECONDS,
            buffer_bytes: MQTT_BUFFER_BYTES,
            connect_retries: CONNECT_RETRIES,
            connect_backoff_ms: CONNECT_BACKOFF_MS,
            poll_timeout_ms: 100,
            request_queue_capacity: 10,
        }
    }
}

/// TLS trust settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TlsSection {
    /// PEM bundle replacing the pinned root CA
    pub ca_cert_path: Option<PathBuf>,
    /// Debug aid: retry the init probe without certificate verification
    pub insecure_fallback: bool,
}

/// Token lifetime and clock fallback policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimeSection {
    pub sas_lifetime_secs: u64,
    /// Fixed expiry used when the clock is not synchronized. `None` refuses to init.
    pub fallback_expiry_epoch: Option<u64>,
}

impl Default for TimeSection {
    fn default() -> Self {
        Self {
            sas_lifetime_secs: SAS_LIFETIME_SECONDS,
            fallback_expiry_epoch: None,
        }
    }
}

/// Configuration and connection-string errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Connection string is missing {0}")]
    MissingKey(&'static str),
    #[error("Connection string value for {0} is empty")]
    EmptyValue(&'static str),
    #[error("Connection string value for {key} exceeds {max} bytes")]
    ValueTooLong { key: &'static str, max: usize },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HubConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HubConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration with an inline connection string and default settings
    pub fn with_connection_string<S: Into<String>>(connection_string: S) -> Self {
        Self {
            hub: HubSection {
                connection_string: Some(connection_string.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Reject settings the transport cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mqtt = &self.mqtt;
        if mqtt.buffer_bytes < MQTT_BUFFER_BYTES {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.buffer_bytes must be at least {MQTT_BUFFER_BYTES}, got {}",
                mqtt.buffer_bytes
            )));
        }
        if mqtt.connect_retries == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_retries must be greater than 0".to_string(),
            ));
        }
        if mqtt.keep_alive_secs < 5 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.keep_alive_secs must be at least 5".to_string(),
            ));
        }
        if mqtt.socket_timeout_secs == 0 || mqtt.poll_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt timeouts must be greater than 0".to_string(),
            ));
        }
        if mqtt.request_queue_capacity < 4 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.request_queue_capacity must hold the three subscriptions and a publish"
                    .to_string(),
            ));
        }
        if self.time.sas_lifetime_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "time.sas_lifetime_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the device connection string, inline value first
    pub fn connection_string(&self) -> Result<String, ConfigError> {
        if let Some(inline) = &self.hub.connection_string {
            return Ok(inline.clone());
        }
        Self::get_env_var_required(&self.hub.connection_string_env)
    }

    fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
        std::env::var(env_var_name)
            .map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_wire_defaults() {
        let config = HubConfig::from_toml_str("").unwrap();
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.socket_timeout_secs, 30);
        assert_eq!(config.mqtt.buffer_bytes, 1024);
        assert_eq!(config.mqtt.connect_retries, 5);
        assert_eq!(config.mqtt.connect_backoff_ms, 3000);
        assert_eq!(config.time.sas_lifetime_secs, 86_400);
        assert_eq!(config.time.fallback_expiry_epoch, None);
        assert!(!config.tls.insecure_fallback);
        assert_eq!(
            config.hub.connection_string_env,
            "IOTHUB_DEVICE_CONNECTION_STRING"
        );
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[hub]
connection_string = "HostName=h.example;DeviceId=d1;SharedAccessKey=AAAA"

[mqtt]
buffer_bytes = 4096
connect_retries = 3
connect_backoff_ms = 500
poll_timeout_ms = 20

[tls]
ca_cert_path = "certs/root.pem"
insecure_fallback = true

[time]
fallback_expiry_epoch = 1738540800
"#;

        let config = HubConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.mqtt.buffer_bytes, 4096);
        assert_eq!(config.mqtt.connect_retries, 3);
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.tls.ca_cert_path, Some(PathBuf::from("certs/root.pem")));
        assert!(config.tls.insecure_fallback);
        assert_eq!(config.time.fallback_expiry_epoch, Some(1_738_540_800));
        assert_eq!(
            config.connection_string().unwrap(),
            "HostName=h.example;DeviceId=d1;SharedAccessKey=AAAA"
        );
    }

    #[test]
    fn test_small_buffer_rejected() {
        let result = HubConfig::from_toml_str("[mqtt]\nbuffer_bytes = 512\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let result = HubConfig::from_toml_str("[mqtt]\nconnect_retries = 0\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_short_keepalive_rejected() {
        let result = HubConfig::from_toml_str("[mqtt]\nkeep_alive_secs = 1\n");
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = HubConfig::from_toml_str("[mqtt\nport = ");
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_missing_env_var() {
        let mut config = HubConfig::default();
        config.hub.connection_string_env = "IOTHUB_TEST_UNSET_VARIABLE_31337".to_string();
        let result = config.connection_string();
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "IOTHUB_TEST_UNSET_VARIABLE_31337"));
    }

    #[test]
    fn test_with_connection_string() {
        let config = HubConfig::with_connection_string("HostName=a;DeviceId=b;SharedAccessKey=c");
        assert!(config.validate().is_ok());
        assert_eq!(
            config.connection_string().unwrap(),
            "HostName=a;DeviceId=b;SharedAccessKey=c"
        );
    }
}
