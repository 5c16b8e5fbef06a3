//! TLS configuration and the init-time handshake probe
//!
//! The hub chain is verified against one pinned root (DigiCert Global Root G2)
//! unless a PEM bundle is configured instead.

use crate::transport::TransportError;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// DigiCert Global Root G2, the root of the IoT hub server chain
pub const PINNED_ROOT_CA_PEM: &str = include_str!("../../../certs/digicert_global_root_g2.pem");

fn read_certs(reader: &mut dyn BufRead) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let certs = rustls_pemfile::certs(reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("Failed to parse CA cert: {e}")))?;
    if certs.is_empty() {
        return Err(TransportError::Tls("No certificate found in PEM".to_string()));
    }
    Ok(certs)
}

/// Trust store holding the pinned root, or the certificates in `ca_path`
pub fn root_store(ca_path: Option<&Path>) -> Result<RootCertStore, TransportError> {
    let certs = match ca_path {
        Some(path) => {
            let file = File::open(path).map_err(|e| {
                TransportError::Tls(format!("Failed to open CA cert {}: {e}", path.display()))
            })?;
            read_certs(&mut BufReader::new(file))?
        }
        None => read_certs(&mut PINNED_ROOT_CA_PEM.as_bytes())?,
    };

    let mut roots = RootCertStore::empty();
    for cert in certs {
        roots
            .add(cert)
            .map_err(|e| TransportError::Tls(format!("Failed to add CA cert: {e}")))?;
    }
    Ok(roots)
}

/// Client config that verifies the server chain
pub fn build_verified_config(ca_path: Option<&Path>) -> Result<ClientConfig, TransportError> {
    Ok(ClientConfig::builder()
        .with_root_certificates(root_store(ca_path)?)
        .with_no_client_auth())
}

/// Client config that accepts any server certificate
pub fn build_insecure_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(danger::NoCertificateVerification))
        .with_no_client_auth()
}

/// One TCP connect plus TLS handshake, then close
pub async fn probe_tls(
    host: &str,
    port: u16,
    config: Arc<ClientConfig>,
    timeout: Duration,
) -> Result<(), TransportError> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| TransportError::Tls(format!("Invalid server name: {host}")))?;

    let handshake = async {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| TransportError::Tls(format!("TCP connect failed: {e}")))?;
        TlsConnector::from(config)
            .connect(server_name, stream)
            .await
            .map_err(|e| TransportError::Tls(format!("Handshake failed: {e}")))
    };

    let tls_stream = tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| TransportError::Tls(format!("Handshake timed out after {timeout:?}")))??;

    debug!(host = %host, port = port, "TLS probe handshake completed");
    drop(tls_stream);
    Ok(())
}

mod danger {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error, SignatureScheme};

    #[derive(Debug)]
    pub struct NoCertificateVerification;

    impl ServerCertVerifier for NoCertificateVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_pinned_root_parses() {
        let roots = root_store(None).unwrap();
        assert_eq!(roots.len(), 1);
        assert!(build_verified_config(None).is_ok());
    }

    #[test]
    fn test_custom_ca_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(PINNED_ROOT_CA_PEM.as_bytes()).unwrap();
        file.write_all(PINNED_ROOT_CA_PEM.as_bytes()).unwrap();

        let roots = root_store(Some(file.path())).unwrap();
        assert!(!roots.is_empty());
    }

    #[test]
    fn test_missing_ca_file() {
        let result = root_store(Some(Path::new("/nonexistent/root.pem")));
        assert!(matches!(result, Err(TransportError::Tls(_))));
    }

    #[test]
    fn test_empty_pem_rejected() {
        let file = NamedTempFile::new().unwrap();
        let result = root_store(Some(file.path()));
        assert!(matches!(result, Err(TransportError::Tls(_))));
    }

    #[tokio::test]
    async fn test_probe_unreachable_port_fails() {
        let config = Arc::new(build_insecure_config());
        // port 9 on loopback is not listening in test environments
        let result = probe_tls("127.0.0.1", 9, config, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(TransportError::Tls(_))));
    }
}
