//! TLS provisioning for the shared listener
//!
//! Loads the PEM certificate chain and private key once at startup and
//! produces the single [`TlsMaterial`] the process uses for both directions:
//!
//! - the listener's acceptor terminates inbound TLS with it
//! - the REST gateway dials the RPC endpoint over loopback, trusting the
//!   same certificates and verifying the same server name
//!
//! The rustls config advertises ALPN `h2` only: gRPC needs HTTP/2 and every
//! browser that reaches the REST surface speaks it too.
//!
//! Certificate rotation requires a restart.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::sign::CertifiedKey;
use tokio_rustls::TlsAcceptor;
use tonic::transport::{Certificate, ClientTlsConfig};

/// ALPN protocol list advertised by the listener
pub const ALPN_H2: &[u8] = b"h2";

/// TLS provisioning errors
///
/// Every variant is fatal: the process exits before the listener binds.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// A certificate or key file could not be read
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        /// File that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The certificate file contains no PEM certificates
    #[error("No certificates found in PEM input")]
    NoCertificates,

    /// A certificate block could not be decoded
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The private key could not be decoded or loaded
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// The private key does not belong to the leaf certificate
    #[error("Certificate and private key do not match: {0}")]
    InvalidKeyPair(String),

    /// The server name is not a valid DNS name or IP address
    #[error("Invalid TLS server name '{0}'")]
    InvalidServerName(String),

    /// rustls rejected the configuration
    #[error("TLS configuration error: {0}")]
    Configuration(String),
}

/// Loaded TLS material, constructed once per process and shared by `Arc`
#[derive(Debug)]
pub struct TlsMaterial {
    server_name: String,
    cert_pem: Vec<u8>,
    server_config: Arc<rustls::ServerConfig>,
}

impl TlsMaterial {
    /// Read the certificate chain and key from disk and build the server config
    pub fn load(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        server_name: impl Into<String>,
    ) -> Result<Self, TlsError> {
        let cert_pem = read_file(cert_path.as_ref())?;
        let key_pem = read_file(key_path.as_ref())?;

        let material = Self::from_pem(cert_pem, &key_pem, server_name)?;

        tracing::info!(
            cert_path = %cert_path.as_ref().display(),
            server_name = %material.server_name,
            "Loaded TLS certificate"
        );

        Ok(material)
    }

    /// Build from in-memory PEM data
    pub fn from_pem(
        cert_pem: Vec<u8>,
        key_pem: &[u8],
        server_name: impl Into<String>,
    ) -> Result<Self, TlsError> {
        let server_name = server_name.into();
        ServerName::try_from(server_name.as_str())
            .map_err(|_| TlsError::InvalidServerName(server_name.clone()))?;

        let certs = CertificateDer::pem_slice_iter(&cert_pem)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TlsError::InvalidCertificate(e.to_string()))?;
        if certs.is_empty() {
            return Err(TlsError::NoCertificates);
        }

        let key = PrivateKeyDer::from_pem_slice(key_pem)
            .map_err(|e| TlsError::InvalidKey(e.to_string()))?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());

        let signing_key = provider
            .key_provider
            .load_private_key(key.clone_key())
            .map_err(|e| TlsError::InvalidKey(e.to_string()))?;
        match CertifiedKey::new(certs.clone(), signing_key).keys_match() {
            // The key type cannot report its public half; rustls checks again below.
            Ok(()) | Err(rustls::Error::InconsistentKeys(rustls::InconsistentKeys::Unknown)) => {}
            Err(e) => return Err(TlsError::InvalidKeyPair(e.to_string())),
        }

        let mut config = rustls::ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| TlsError::Configuration(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| TlsError::InvalidKeyPair(e.to_string()))?;
        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        Ok(Self {
            server_name,
            cert_pem,
            server_config: Arc::new(config),
        })
    }

    /// Name the certificate is presented and verified under
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Shared rustls server configuration
    pub fn server_config(&self) -> Arc<rustls::ServerConfig> {
        Arc::clone(&self.server_config)
    }

    /// Acceptor for inbound connections
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config())
    }

    /// Client settings for the gateway's loopback dial
    ///
    /// Trusts the loaded certificates as roots and verifies `server_name`.
    pub fn client_tls(&self) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(&self.cert_pem))
            .domain_name(self.server_name.clone())
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, KeyPair};

    fn self_signed(name: &str) -> (String, String) {
        let key_pair = KeyPair::generate().unwrap();
        let params = CertificateParams::new(vec![name.to_string()]).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        (cert.pem(), key_pair.serialize_pem())
    }

    #[test]
    fn test_advertises_h2_only() {
        let (cert, key) = self_signed("localhost");
        let material =
            TlsMaterial::from_pem(cert.into_bytes(), key.as_bytes(), "localhost").unwrap();

        assert_eq!(material.server_config().alpn_protocols, vec![b"h2".to_vec()]);
        assert_eq!(material.server_name(), "localhost");
    }

    #[test]
    fn test_acceptor_uses_loaded_config() {
        let (cert, key) = self_signed("localhost");
        let material =
            TlsMaterial::from_pem(cert.into_bytes(), key.as_bytes(), "localhost").unwrap();

        let acceptor = material.acceptor();
        assert!(Arc::ptr_eq(acceptor.config(), &material.server_config()));
    }

    #[test]
    fn test_missing_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        let result = TlsMaterial::load(
            dir.path().join("tls.pem"),
            dir.path().join("tls.key"),
            "localhost",
        );

        match result {
            Err(TlsError::Read { path, .. }) => assert!(path.ends_with("tls.pem")),
            other => panic!("expected read error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_mismatched_key_is_fatal() {
        let (cert, _) = self_signed("localhost");
        let (_, other_key) = self_signed("localhost");

        let result = TlsMaterial::from_pem(cert.into_bytes(), other_key.as_bytes(), "localhost");
        assert!(matches!(result, Err(TlsError::InvalidKeyPair(_))));
    }

    #[test]
    fn test_empty_pem_is_rejected() {
        let (_, key) = self_signed("localhost");
        let result = TlsMaterial::from_pem(Vec::new(), key.as_bytes(), "localhost");
        assert!(matches!(result, Err(TlsError::NoCertificates)));
    }

    #[test]
    fn test_garbage_key_is_rejected() {
        let (cert, _) = self_signed("localhost");
        let result = TlsMaterial::from_pem(cert.into_bytes(), b"not a key", "localhost");
        assert!(matches!(result, Err(TlsError::InvalidKey(_))));
    }

    #[test]
    fn test_invalid_server_name() {
        let (cert, key) = self_signed("localhost");
        let result = TlsMaterial::from_pem(cert.into_bytes(), key.as_bytes(), "not a name");
        assert!(matches!(result, Err(TlsError::InvalidServerName(_))));
    }
}
