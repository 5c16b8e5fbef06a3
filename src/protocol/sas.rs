//! Shared access signature (SAS) token derivation
//!
//! The token is an HMAC-SHA-256 over the URL-encoded resource URI and the
//! expiry, keyed by the base64-decoded device key:
//!
//! ```text
//! SharedAccessSignature sr={urlenc(host/devices/id)}&sig={urlenc(b64(hmac))}&se={expiry}
//! ```

use super::connection_string::ConnectionDescriptor;
use crate::config::API_VERSION;
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Padded base64 length of a 32-byte HMAC-SHA-256 digest
const SIGNATURE_B64_LEN: usize = 44;

/// Credential derivation failures
#[derive(Debug, Error, PartialEq)]
pub enum CryptoError {
    #[error("Shared access key is not valid base64")]
    KeyDecode,
    #[error("HMAC key setup failed: {0}")]
    HmacSetup(String),
    #[error("Signature does not fit the encode buffer")]
    Encode,
}

/// Percent-encode everything outside the RFC 3986 unreserved set
/// (`A-Z a-z 0-9 - _ . ~`), using upper-case hex digits.
pub fn url_encode(input: &str) -> String {
    url_encode_bytes(input.as_bytes())
}

pub fn url_encode_bytes(input: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";

    let mut encoded = String::with_capacity(input.len() * 3);
    for &byte in input {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(char::from(byte));
        } else {
            encoded.push('%');
            encoded.push(char::from(HEX[usize::from(byte >> 4)]));
            encoded.push(char::from(HEX[usize::from(byte & 0x0F)]));
        }
    }
    encoded
}

/// Resource URI the token is scoped to: `{host}/devices/{device_id}`
pub fn resource_uri(host: &str, device_id: &str) -> String {
    format!("{host}/devices/{device_id}")
}

/// Derive the SAS token for a device identity and absolute expiry
pub fn generate_sas_token(
    host: &str,
    device_id: &str,
    shared_key: &str,
    expiry: u64,
) -> Result<String, CryptoError> {
    let encoded_uri = url_encode(&resource_uri(host, device_id));
    let string_to_sign = format!("{encoded_uri}\n{expiry}");

    let key = Base64::decode_vec(shared_key).map_err(|_| CryptoError::KeyDecode)?;
    let mut mac =
        HmacSha256::new_from_slice(&key).map_err(|e| CryptoError::HmacSetup(e.to_string()))?;
    mac.update(string_to_sign.as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut buffer = [0u8; SIGNATURE_B64_LEN];
    let signature = Base64::encode(&digest, &mut buffer).map_err(|_| CryptoError::Encode)?;

    Ok(format!(
        "SharedAccessSignature sr={encoded_uri}&sig={}&se={expiry}",
        url_encode(signature)
    ))
}

/// MQTT CONNECT username: `{host}/{device_id}/?api-version={API_VERSION}`
pub fn mqtt_username(host: &str, device_id: &str) -> String {
    format!("{host}/{device_id}/?api-version={API_VERSION}")
}

/// Everything the transport needs to authenticate one session
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    client_id: String,
    username: String,
    token: String,
    expiry: u64,
}

impl Credentials {
    /// Derive credentials for `descriptor`, valid until `expiry` (epoch seconds)
    pub fn derive(descriptor: &ConnectionDescriptor, expiry: u64) -> Result<Self, CryptoError> {
        let token = generate_sas_token(
            descriptor.host(),
            descriptor.device_id(),
            descriptor.shared_key(),
            expiry,
        )?;

        Ok(Self {
            client_id: descriptor.device_id().to_string(),
            username: mqtt_username(descriptor.host(), descriptor.device_id()),
            token,
            expiry,
        })
    }

    /// MQTT client identifier (the device id)
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// SAS token, sent as the MQTT password
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Absolute expiry in epoch seconds
    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    pub fn is_expired(&self, now_epoch: u64) -> bool {
        now_epoch >= self.expiry
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("token", &"SharedAccessSignature ***")
            .field("expiry", &self.expiry)
            .finish()
    }
}
