//! Device connection string parsing
//!
//! `HostName={host};DeviceId={id};SharedAccessKey={key}[;...]`, keys in any
//! order, extra keys ignored, trailing `;` optional.

use crate::config::ConfigError;
use std::fmt;

pub const HOST_NAME_KEY: &str = "HostName";
pub const DEVICE_ID_KEY: &str = "DeviceId";
pub const SHARED_ACCESS_KEY_KEY: &str = "SharedAccessKey";

/// Longest accepted host name, in bytes
pub const MAX_HOST_LEN: usize = 127;
/// Longest accepted device id, in bytes
pub const MAX_DEVICE_ID_LEN: usize = 63;
/// Longest accepted base64 shared key, in bytes
pub const MAX_SHARED_KEY_LEN: usize = 63;

/// Parsed device identity. Immutable once constructed.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    host: String,
    device_id: String,
    shared_key: String,
}

impl ConnectionDescriptor {
    /// Parse a device connection string
    pub fn parse(connection_string: &str) -> Result<Self, ConfigError> {
        let mut host = None;
        let mut device_id = None;
        let mut shared_key = None;

        for fragment in connection_string.split(';') {
            let Some((key, value)) = fragment.trim().split_once('=') else {
                continue;
            };
            let slot = match key {
                HOST_NAME_KEY => &mut host,
                DEVICE_ID_KEY => &mut device_id,
                SHARED_ACCESS_KEY_KEY => &mut shared_key,
                _ => continue,
            };
            // first occurrence wins
            if slot.is_none() {
                *slot = Some(value);
            }
        }

        Ok(Self {
            host: bounded(HOST_NAME_KEY, host, MAX_HOST_LEN)?,
            device_id: bounded(DEVICE_ID_KEY, device_id, MAX_DEVICE_ID_LEN)?,
            shared_key: bounded(SHARED_ACCESS_KEY_KEY, shared_key, MAX_SHARED_KEY_LEN)?,
        })
    }

    /// Fully-qualified hub host name
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Base64 shared key exactly as it appeared in the connection string
    pub fn shared_key(&self) -> &str {
        &self.shared_key
    }

    /// Rebuild the canonical three-field connection string
    pub fn to_connection_string(&self) -> String {
        format!(
            "{HOST_NAME_KEY}={};{DEVICE_ID_KEY}={};{SHARED_ACCESS_KEY_KEY}={}",
            self.host, self.device_id, self.shared_key
        )
    }
}

fn bounded(key: &'static str, value: Option<&str>, max: usize) -> Result<String, ConfigError> {
    let value = value.ok_or(ConfigError::MissingKey(key))?;
    if value.is_empty() {
        return Err(ConfigError::EmptyValue(key));
    }
    if value.len() > max {
        return Err(ConfigError::ValueTooLong { key, max });
    }
    Ok(value.to_string())
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("device_id", &self.device_id)
            .field("shared_key", &"***")
            .finish()
    }
}
