//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Decode PEM certificates and keys
//! - Build the edge server config (client certificate mandatory)
//! - Hold the process-wide CA pool used to re-verify peers on CONNECT
//!
//! Every builder takes the `ring` provider explicitly so no process-wide
//! default provider has to be installed.

use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, RootCertStore, ServerConfig, SignatureScheme};
use thiserror::Error;

/// Errors building TLS material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("private key error: {0}")]
    PrivateKey(String),

    #[error("tls config error: {0}")]
    Config(String),
}

/// The crypto provider used by every config in this crate.
pub fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Parse every certificate in a PEM document.
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Certificate(format!("failed to parse certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(TlsError::Certificate("no certificates found".into()));
    }
    Ok(certs)
}

/// Parse the first private key in a PEM document.
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| TlsError::PrivateKey(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| TlsError::PrivateKey("no private key found".into()))
}

/// Read a PEM file from disk.
pub fn read_pem(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Process-wide pool of trusted client CAs.
///
/// Loaded once at startup, shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct CaPool {
    verifier: Arc<dyn ClientCertVerifier>,
    size: usize,
}

impl CaPool {
    /// Build a pool from PEM encoded CA certificates.
    pub fn from_pem(pem: &[u8]) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in parse_certificates(pem)? {
            roots
                .add(cert)
                .map_err(|e| TlsError::Certificate(format!("failed to add CA certificate: {}", e)))?;
        }
        let size = roots.len();

        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), crypto_provider())
            .build()
            .map_err(|e| TlsError::Config(format!("client verifier error: {}", e)))?;

        Ok(Self { verifier, size })
    }

    pub fn load(path: &Path) -> Result<Self, TlsError> {
        Self::from_pem(&read_pem(path)?)
    }

    /// Number of trust anchors in the pool.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Verify a presented chain (leaf first) against the pool.
    pub fn verify_peer(&self, chain: &[CertificateDer<'_>]) -> Result<(), TlsError> {
        let (leaf, intermediates) = chain
            .split_first()
            .ok_or_else(|| TlsError::Certificate("no peer certificate presented".into()))?;
        self.verifier
            .verify_client_cert(leaf, intermediates, UnixTime::now())
            .map(|_| ())
            .map_err(|e| TlsError::Certificate(e.to_string()))
    }

    fn verifier(&self) -> Arc<dyn ClientCertVerifier> {
        self.verifier.clone()
    }
}

/// Demands a client certificate but defers chain verification.
///
/// Proof of possession is still checked through the handshake signature.
#[derive(Debug)]
struct AnyClientCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ClientCertVerifier for AnyClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

/// Build the edge listener config. TLS 1.3 only, client certificate required.
///
/// With `verify_at_handshake` the chain is checked against `ca_pool` during
/// the handshake; otherwise any certificate is accepted there and the caller
/// verifies on CONNECT.
pub fn edge_server_config(
    cert_pem: &[u8],
    key_pem: &[u8],
    ca_pool: &CaPool,
    verify_at_handshake: bool,
) -> Result<Arc<ServerConfig>, TlsError> {
    let provider = crypto_provider();
    let certs = parse_certificates(cert_pem)?;
    let key = parse_private_key(key_pem)?;

    let verifier: Arc<dyn ClientCertVerifier> = if verify_at_handshake {
        ca_pool.verifier()
    } else {
        Arc::new(AnyClientCert {
            algorithms: provider.signature_verification_algorithms,
        })
    };

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(format!("server config error: {}", e)))?;

    Ok(Arc::new(config))
}

#[cfg(test)]
pub(crate) mod test_utils {
    /// Generate a self-signed certificate and key as PEM strings.
    pub fn self_signed(name: &str) -> (String, String) {
        let certified = rcgen::generate_simple_self_signed(vec![name.to_string()])
            .expect("certificate generation should succeed");
        (certified.cert.pem(), certified.key_pair.serialize_pem())
    }
}
