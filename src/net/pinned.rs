//! Certificate-pinned TLS dialing of backend instances.
//!
//! The certificate stored with an instance is used both ways: it is the
//! client identity the dispatcher presents, and it is the only certificate the
//! dispatcher will accept from the instance. No CA chain and no hostname are
//! checked; the server's leaf must be byte-for-byte the pinned certificate.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, SignatureScheme};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::net::tls::{crypto_provider, parse_certificates, parse_private_key, TlsError};
use crate::repository::InstanceCertificate;

/// Accepts exactly one server certificate.
#[derive(Debug)]
pub struct PinnedCertVerifier {
    pinned: CertificateDer<'static>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl PinnedCertVerifier {
    pub fn new(pinned: CertificateDer<'static>, algorithms: WebPkiSupportedAlgorithms) -> Self {
        Self { pinned, algorithms }
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
        }
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

/// Build a client config that presents and trusts only `certificate`.
pub fn pinned_client_config(certificate: &InstanceCertificate) -> Result<Arc<ClientConfig>, TlsError> {
    let provider = crypto_provider();
    let chain = parse_certificates(certificate.cert.as_bytes())?;
    let key = parse_private_key(certificate.key.as_bytes())?;
    let verifier = PinnedCertVerifier::new(chain[0].clone(), provider.signature_verification_algorithms);

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Config(e.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_client_auth_cert(chain, key)
        .map_err(|e| TlsError::Config(format!("client config error: {}", e)))?;

    Ok(Arc::new(config))
}

/// Per-instance cache of pinned client configs.
///
/// An entry is rebuilt when the instance's stored certificate changes.
#[derive(Debug, Default)]
pub struct PinnedConnectors {
    configs: DashMap<String, (InstanceCertificate, Arc<ClientConfig>)>,
}

impl PinnedConnectors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector for the instance `id` holding `certificate`.
    pub fn connector(&self, id: &str, certificate: &InstanceCertificate) -> Result<TlsConnector, TlsError> {
        if let Some(entry) = self.configs.get(id) {
            if &entry.0 == certificate {
                return Ok(TlsConnector::from(entry.1.clone()));
            }
        }

        let config = pinned_client_config(certificate)?;
        self.configs
            .insert(id.to_string(), (certificate.clone(), config.clone()));
        tracing::debug!(instance_id = %id, "Pinned TLS config built");
        Ok(TlsConnector::from(config))
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// Dial `host:port` over TLS with the pinned connector, bounded by `timeout`.
pub async fn dial(
    connector: &TlsConnector,
    host: &str,
    port: u16,
    timeout: Duration,
) -> std::io::Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let handshake = async {
        let tcp = TcpStream::connect((host, port)).await?;
        tcp.set_nodelay(true)?;
        connector.connect(server_name, tcp).await
    };

    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "backend dial timed out"))?
}
