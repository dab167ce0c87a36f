//! Security parameters and TLS client configuration.
//!
//! Connections are secured with TLS unless security is explicitly
//! disabled. Server certificates are verified against the webpki root set
//! plus any extra roots supplied here.
//!
//! ```ignore
//! use transport_services::security::{Certificate, SecurityParameters, TlsVersion};
//!
//! let ca = Certificate::from_pem(std::fs::read("ca.crt")?)?;
//! let security = SecurityParameters::new()
//!     .add_root_certificate(ca)
//!     .alpn_protocol("h2")
//!     .min_version(TlsVersion::Tls1_3);
//! ```

use std::io::{BufReader, Cursor};
use std::sync::Arc;

use rustls_pki_types::CertificateDer;
use rustls::{ClientConfig, RootCertStore};

use crate::error::EstablishmentError;

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    /// TLS 1.2 (default minimum).
    #[default]
    Tls1_2,
    /// TLS 1.3.
    Tls1_3,
}

impl TlsVersion {
    fn to_rustls_versions(self) -> Vec<&'static rustls::SupportedProtocolVersion> {
        match self {
            TlsVersion::Tls1_2 => vec![&rustls::version::TLS12, &rustls::version::TLS13],
            TlsVersion::Tls1_3 => vec![&rustls::version::TLS13],
        }
    }
}

/// One or more DER certificates to trust as roots.
#[derive(Clone)]
pub struct Certificate {
    der_certs: Vec<CertificateDer<'static>>,
}

impl std::fmt::Debug for Certificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certificate")
            .field("cert_count", &self.der_certs.len())
            .finish()
    }
}

impl Certificate {
    /// Load certificates from PEM-encoded bytes.
    pub fn from_pem(pem_data: impl AsRef<[u8]>) -> Result<Self, EstablishmentError> {
        let mut reader = BufReader::new(Cursor::new(pem_data.as_ref()));
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                EstablishmentError::Security(format!("Failed to parse PEM certificate: {}", e))
            })?;

        if certs.is_empty() {
            return Err(EstablishmentError::Security(
                "No certificates found in PEM data".to_string(),
            ));
        }

        Ok(Self { der_certs: certs })
    }

    /// Wrap a DER-encoded certificate.
    pub fn from_der(der_data: impl Into<Vec<u8>>) -> Self {
        Self {
            der_certs: vec![CertificateDer::from(der_data.into())],
        }
    }

    /// The DER-encoded certificates.
    pub fn der_certs(&self) -> &[CertificateDer<'static>] {
        &self.der_certs
    }
}

impl From<CertificateDer<'static>> for Certificate {
    fn from(cert: CertificateDer<'static>) -> Self {
        Self {
            der_certs: vec![cert],
        }
    }
}

/// Security requirements for a preconnection.
#[derive(Debug, Clone, Default)]
pub struct SecurityParameters {
    /// Connect without TLS.
    pub disabled: bool,
    /// Name to present via SNI and verify against; defaults to the hostname.
    pub server_name: Option<String>,
    /// ALPN protocol identifiers to offer.
    pub alpn: Vec<Vec<u8>>,
    /// Additional trusted roots.
    pub extra_roots: Vec<Certificate>,
    /// Trust only `extra_roots`, not the webpki set.
    pub use_only_custom_roots: bool,
    /// Minimum TLS version.
    pub min_version: TlsVersion,
    /// Skip certificate verification (DANGEROUS - testing only).
    pub danger_accept_invalid_certs: bool,
}

impl SecurityParameters {
    /// TLS with default verification.
    pub fn new() -> Self {
        Self::default()
    }

    /// No transport security.
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    /// Whether connections must be secured.
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Override the server name.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Offer an ALPN protocol.
    pub fn alpn_protocol(mut self, protocol: impl AsRef<[u8]>) -> Self {
        self.alpn.push(protocol.as_ref().to_vec());
        self
    }

    /// Trust an additional root.
    pub fn add_root_certificate(mut self, cert: impl Into<Certificate>) -> Self {
        self.extra_roots.push(cert.into());
        self
    }

    /// Trust only the added roots.
    pub fn use_only_custom_roots(mut self) -> Self {
        self.use_only_custom_roots = true;
        self
    }

    /// Set the minimum TLS version.
    pub fn min_version(mut self, version: TlsVersion) -> Self {
        self.min_version = version;
        self
    }

    /// Accept any server certificate (DANGEROUS - for testing only).
    ///
    /// # Warning
    ///
    /// This disables certificate verification and makes the connection
    /// vulnerable to man-in-the-middle attacks.
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.danger_accept_invalid_certs = true;
        self
    }

    /// Build the rustls client configuration, or `None` when security is disabled.
    pub fn client_config(&self) -> Result<Option<Arc<ClientConfig>>, EstablishmentError> {
        if self.disabled {
            return Ok(None);
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let versions = self.min_version.to_rustls_versions();
        let builder = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&versions)
            .map_err(|e| EstablishmentError::Security(format!("Unsupported TLS versions: {}", e)))?;

        let mut config = if self.danger_accept_invalid_certs {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(DangerousVerifier))
                .with_no_client_auth()
        } else {
            builder
                .with_root_certificates(self.build_root_store()?)
                .with_no_client_auth()
        };

        if !self.alpn.is_empty() {
            config.alpn_protocols = self.alpn.clone();
        }

        Ok(Some(Arc::new(config)))
    }

    fn build_root_store(&self) -> Result<RootCertStore, EstablishmentError> {
        let mut root_store = RootCertStore::empty();

        if !self.use_only_custom_roots {
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }

        for cert in &self.extra_roots {
            for der_cert in cert.der_certs() {
                root_store.add(der_cert.clone()).map_err(|e| {
                    EstablishmentError::Security(format!("Failed to add root certificate: {}", e))
                })?;
            }
        }

        if root_store.is_empty() {
            return Err(EstablishmentError::Security(
                "No root certificates available".to_string(),
            ));
        }

        Ok(root_store)
    }
}

/// Accepts every server certificate.
#[derive(Debug)]
struct DangerousVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_tls() {
        let security = SecurityParameters::new();
        assert!(security.is_enabled());
        assert_eq!(security.min_version, TlsVersion::Tls1_2);
        assert!(!SecurityParameters::disabled().is_enabled());
    }

    #[test]
    fn test_disabled_has_no_client_config() {
        let config = SecurityParameters::disabled().client_config().unwrap();
        assert!(config.is_none());
    }

    #[test]
    fn test_client_config_with_webpki_roots() {
        let config = SecurityParameters::new()
            .alpn_protocol("h2")
            .client_config()
            .unwrap()
            .expect("TLS config");
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn test_only_custom_roots_without_certs_fails() {
        let result = SecurityParameters::new().use_only_custom_roots().client_config();
        assert!(matches!(result, Err(EstablishmentError::Security(_))));
    }

    #[test]
    fn test_dangerous_config_builds() {
        let config = SecurityParameters::new()
            .use_only_custom_roots()
            .danger_accept_invalid_certs()
            .client_config()
            .unwrap();
        assert!(config.is_some());
    }

    #[test]
    fn test_certificate_from_pem_rejects_garbage() {
        assert!(Certificate::from_pem(b"not a certificate").is_err());
    }
}
