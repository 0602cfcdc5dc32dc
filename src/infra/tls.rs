//! TLS client configuration.
//!
//! Every configuration is built against an explicit `ring` crypto provider, so
//! nothing depends on a process-wide default provider being installed.

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};
use std::sync::Arc;

use crate::auth::ClientIdentity;
use crate::error::{HttpClientError, Result};

/// Client certificate chain (leaf first) and its private key.
pub type ClientCertificate = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// Source of rustls client configurations.
pub trait TlsProvider: Send + Sync {
    fn client_config(&self) -> Result<Arc<ClientConfig>>;
}

/// Mozilla roots, no client certificate.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustlsTlsProvider;

impl RustlsTlsProvider {
    pub fn new() -> Self {
        Self
    }
}

impl TlsProvider for RustlsTlsProvider {
    fn client_config(&self) -> Result<Arc<ClientConfig>> {
        create_tls_config(None, None)
    }
}

impl TlsProvider for ClientIdentity {
    fn client_config(&self) -> Result<Arc<ClientConfig>> {
        Ok(self.tls_config())
    }
}

pub fn webpki_roots() -> RootCertStore {
    RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned())
}

/// Builds a client configuration trusting `roots` (webpki roots when `None`)
/// and presenting `identity` when given. TLS 1.2 and 1.3 are enabled.
pub fn create_tls_config(
    roots: Option<RootCertStore>,
    identity: Option<ClientCertificate>,
) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpClientError::Configuration(format!("TLS protocol setup failed: {}", e)))?
        .with_root_certificates(roots.unwrap_or_else(webpki_roots));

    let config = match identity {
        Some((chain, key)) => builder.with_client_auth_cert(chain, key).map_err(|e| {
            HttpClientError::Configuration(format!("Client certificate rejected: {}", e))
        })?,
        None => builder.with_no_client_auth(),
    };

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::PrivatePkcs8KeyDer;

    #[test]
    fn test_default_config_builds() {
        assert!(RustlsTlsProvider::new().client_config().is_ok());
        assert!(!webpki_roots().is_empty());
    }

    #[test]
    fn test_invalid_client_key_is_configuration_error() {
        let identity = (
            vec![CertificateDer::from(vec![0u8; 8])],
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(vec![1u8; 8])),
        );
        let err = create_tls_config(None, Some(identity)).unwrap_err();
        assert!(err.is_configuration_error());
    }
}
