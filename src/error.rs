//! Error types for the IoT hub device client
//!
//! Every caller-visible failure is a [`HubError`]. Lower layers own their own
//! `thiserror` enums ([`ConfigError`], [`CryptoError`]) which convert into it.

use crate::config::ConfigError;
use crate::protocol::sas::CryptoError;
use crate::transport::mqtt::MqttState;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for hub client operations
#[derive(Debug, Error)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Clock is not synchronized and no fallback expiry is configured")]
    Time,

    #[error("Credential derivation failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("TLS probe to {host} failed: {reason}")]
    TlsProbe { host: String, reason: String },

    #[error("Connect failed after {attempts} attempts, last state {state}")]
    ConnectFailed { attempts: u32, state: MqttState },

    #[error("Client is not initialized")]
    NotInitialized,

    #[error("Not connected to IoT hub")]
    NotConnected,

    #[error("Publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },
}

impl HubError {
    /// Create a TLS probe error, masking any credential material in the reason
    pub fn tls_probe<S: Into<String>>(host: &str, reason: S) -> Self {
        Self::TlsProbe {
            host: host.to_string(),
            reason: redact_secrets(&reason.into()),
        }
    }

    /// Create a publish failure
    pub fn publish_failed<S: Into<String>>(topic: &str, reason: S) -> Self {
        Self::PublishFailed {
            topic: topic.to_string(),
            reason: redact_secrets(&reason.into()),
        }
    }
}

static SIGNATURE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(sig|SharedAccessKey)=[^&;\s]+").unwrap()
});

static TOKEN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"SharedAccessSignature\s+\S+").unwrap()
});

/// Mask SAS signatures, shared keys and whole tokens before a string is logged
pub fn redact_secrets(message: &str) -> String {
    let masked = TOKEN_PATTERN.replace_all(message, "SharedAccessSignature ***");
    SIGNATURE_PATTERN
        .replace_all(&masked, "${1}=***")
        .into_owned()
}

/// Result type for hub client operations
pub type HubResult<T> = Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_shared_access_key() {
        let redacted =
            redact_secrets("HostName=h.example;DeviceId=d1;SharedAccessKey=c2VjcmV0a2V5=");
        assert!(!redacted.contains("c2VjcmV0a2V5"));
        assert!(redacted.contains("SharedAccessKey=***"));
        assert!(redacted.contains("HostName=h.example"));
    }

    #[test]
    fn test_redacts_whole_token() {
        let redacted = redact_secrets(
            "auth with SharedAccessSignature sr=h%2Fdevices%2Fd1&sig=abc%2B&se=1 rejected",
        );
        assert_eq!(redacted, "auth with SharedAccessSignature *** rejected");
    }

    #[test]
    fn test_redacts_bare_signature_parameter() {
        let redacted = redact_secrets("sr=x&sig=AbC%3D&se=17");
        assert_eq!(redacted, "sr=x&sig=***&se=17");
    }

    #[test]
    fn test_plain_message_untouched() {
        assert_eq!(redact_secrets("broker unavailable"), "broker unavailable");
        assert_eq!(redact_secrets(""), "");
    }

    #[test]
    fn test_constructors_redact() {
        let error = HubError::tls_probe("h.example", "handshake sig=secret failed");
        assert!(matches!(error, HubError::TlsProbe { .. }));
        assert!(!error.to_string().contains("secret"));

        let error = HubError::publish_failed("devices/d1/messages/events/", "queue full");
        assert_eq!(
            error.to_string(),
            "Publish to devices/d1/messages/events/ failed: queue full"
        );
    }

    #[test]
    fn test_connect_failed_display_carries_state() {
        let error = HubError::ConnectFailed {
            attempts: 5,
            state: MqttState::BadCredentials,
        };
        let text = error.to_string();
        assert!(text.contains('5'));
        assert!(text.contains("4"), "state code should be shown: {text}");
    }

    #[test]
    fn test_error_variants_display() {
        let errors = vec![
            HubError::Time,
            HubError::NotInitialized,
            HubError::NotConnected,
            HubError::Config(ConfigError::MissingKey("HostName")),
        ];
        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
