//! TLS helpers for Explicit and Implicit FTPS (RFC 4217).
//!
//! - `SecureTransport` abstracts the handshake so tests and embedders can
//!   substitute their own stack.
//! - `RustlsTransport` is the default: native roots, optional acceptance
//!   of self-signed certificates. One `ClientConfig` is shared by control
//!   and data channels, so TLS sessions resume across them.

use crate::ftp::protocol::BoxedStream;
use async_trait::async_trait;
use sorng_remotefs::{RemoteError, RemoteResult};
use std::sync::Arc;
use tokio_rustls::TlsConnector;

#[async_trait]
pub trait SecureTransport: Send + Sync {
    /// Run the client handshake over an already connected stream.
    async fn wrap_stream(&self, host: &str, stream: BoxedStream) -> RemoteResult<BoxedStream>;
}

pub struct RustlsTransport {
    connector: TlsConnector,
}

impl RustlsTransport {
    pub fn new(accept_invalid_certs: bool) -> RemoteResult<Self> {
        let mut root_store = rustls::RootCertStore::empty();

        let native = rustls_native_certs::load_native_certs();
        for e in &native.errors {
            log::warn!("Skipping unreadable system certificate store entry: {}", e);
        }
        let (added, ignored) = root_store.add_parsable_certificates(native.certs);
        log::debug!("Loaded {} native root certificates ({} ignored)", added, ignored);

        let mut tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        if accept_invalid_certs {
            log::warn!("TLS certificate verification disabled – insecure!");
            tls_config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoCertVerifier));
        }

        Ok(Self {
            connector: TlsConnector::from(Arc::new(tls_config)),
        })
    }
}

#[async_trait]
impl SecureTransport for RustlsTransport {
    async fn wrap_stream(&self, host: &str, stream: BoxedStream) -> RemoteResult<BoxedStream> {
        let server_name = rustls::pki_types::ServerName::try_from(host.to_string())
            .map_err(|e| RemoteError::configuration(format!("Invalid server name: {}", e)))?;
        let tls = self
            .connector
            .connect(server_name, stream)
            .await
            .map_err(|e| RemoteError::connection(format!("TLS handshake failed: {}", e)))?;
        Ok(Box::new(tls))
    }
}

impl std::fmt::Debug for RustlsTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RustlsTransport")
    }
}

// ─── NoCertVerifier (for self-signed certs) ─────────────────────────

#[derive(Debug)]
struct NoCertVerifier;

impl rustls::client::danger::ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ED25519,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
        ]
    }
}
