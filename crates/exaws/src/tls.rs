//! TLS settings for `wss://` endpoints (feature-gated).
//!
//! Without the `tls` feature only [`TlsMode::Disable`] is accepted.

use std::fmt;

#[cfg(feature = "tls")]
use std::sync::Arc;

use exaws_core::Result;
#[cfg(feature = "tls")]
use exaws_core::Error;
#[cfg(feature = "tls")]
use exaws_core::error::{ConnectionError, ConnectionErrorKind};

use crate::config::TlsMode;

/// Prepared TLS configuration handed to a [`Transport`](crate::Transport).
#[derive(Clone)]
pub struct TlsSettings {
    mode: TlsMode,
    #[cfg(feature = "tls")]
    config: Arc<rustls::ClientConfig>,
}

impl TlsSettings {
    /// Build settings for `mode`; `None` means plain websocket.
    #[allow(clippy::result_large_err)]
    pub fn for_mode(mode: TlsMode) -> Result<Option<Self>> {
        if !mode.is_enabled() {
            return Ok(None);
        }

        #[cfg(feature = "tls")]
        {
            let config = build_client_config(mode)?;
            Ok(Some(Self {
                mode,
                config: Arc::new(config),
            }))
        }

        #[cfg(not(feature = "tls"))]
        {
            Err(exaws_core::Error::Config(exaws_core::error::ConfigError {
                message: format!(
                    "TLS mode {mode:?} requested but exaws was built without the `tls` feature"
                ),
            }))
        }
    }

    /// Use a caller-built rustls configuration.
    #[cfg(feature = "tls")]
    pub fn with_client_config(mode: TlsMode, config: Arc<rustls::ClientConfig>) -> Self {
        Self { mode, config }
    }

    pub fn mode(&self) -> TlsMode {
        self.mode
    }

    #[cfg(feature = "tls")]
    pub fn client_config(&self) -> Arc<rustls::ClientConfig> {
        Arc::clone(&self.config)
    }
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
fn tls_error(message: impl Into<String>) -> Error {
    Error::Connection(ConnectionError {
        kind: ConnectionErrorKind::Tls,
        message: message.into(),
        source: None,
    })
}

/// Build a rustls ClientConfig for the given mode.
///
/// - Require: encrypt, do not verify certificates
/// - VerifyCa: verify against the webpki-roots CA bundle
#[cfg(feature = "tls")]
#[allow(clippy::result_large_err)]
fn build_client_config(mode: TlsMode) -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    if !mode.is_enabled() {
        return Err(tls_error("TLS config requested with TlsMode::Disable"));
    }
    if mode.verifies_certificate() {
        build_webpki_config(&provider)
    } else {
        build_no_verify_config(&provider)
    }
}

/// Exasol clusters commonly run with self-signed certificates.
#[cfg(feature = "tls")]
#[allow(clippy::result_large_err)]
fn build_no_verify_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
) -> Result<rustls::ClientConfig> {
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, Error as RustlsError, SignatureScheme};

    #[derive(Debug)]
    struct AcceptAnyCertificate(Vec<SignatureScheme>);

    impl ServerCertVerifier for AcceptAnyCertificate {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, RustlsError> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, RustlsError> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.0.clone()
        }
    }

    let schemes = provider
        .signature_verification_algorithms
        .supported_schemes();

    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(schemes)))
        .with_no_client_auth();

    Ok(config)
}

#[cfg(feature = "tls")]
#[allow(clippy::result_large_err)]
fn build_webpki_config(
    provider: &Arc<rustls::crypto::CryptoProvider>,
) -> Result<rustls::ClientConfig> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = rustls::ClientConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {e}")))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Ok(config)
}
