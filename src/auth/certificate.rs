//! Client-certificate (mTLS) material.
//!
//! Keystores and truststores are PKCS#12 files. Anything else fails at
//! construction with a configuration error that names the format but never
//! the password.

use p12_keystore::{KeyStore, KeyStoreEntry};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{HttpClientError, Result};
use crate::infra::tls::create_tls_config;
use crate::shared::{parse_x509_basic, Secret};

const KEYSTORE: &str = "keystore";
const TRUSTSTORE: &str = "truststore";

/// Distinct connect timeouts that get their own pooled client per identity.
const MAX_CLIENTS_PER_IDENTITY: usize = 8;

/// Distinct store descriptors kept loaded by an [`IdentityCache`].
const MAX_CACHED_IDENTITIES: usize = 32;

/// Location and unlock material of a certificate store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStore {
    pub path: String,
    #[serde(default)]
    pub password: Option<Secret>,
    /// `PKCS12`, `P12` or `PFX`. Inferred from the file extension when absent.
    #[serde(default, rename = "type")]
    pub store_type: Option<String>,
}

impl CertificateStore {
    pub fn new(path: impl Into<String>, password: Option<Secret>) -> Self {
        Self {
            path: path.into(),
            password,
            store_type: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoreFormat {
    Pkcs12,
}

impl StoreFormat {
    fn resolve(store: &CertificateStore) -> Result<Self> {
        if let Some(declared) = store.store_type.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return match declared.to_ascii_uppercase().as_str() {
                "PKCS12" | "P12" | "PFX" => Ok(StoreFormat::Pkcs12),
                _ => Err(HttpClientError::UnsupportedStoreFormat {
                    format: declared.to_string(),
                }),
            };
        }

        let extension = Path::new(&store.path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("jks") | Some("jceks") | Some("bks") | Some("pem") => {
                Err(HttpClientError::UnsupportedStoreFormat {
                    format: extension.unwrap_or_default().to_ascii_uppercase(),
                })
            }
            _ => Ok(StoreFormat::Pkcs12),
        }
    }
}

fn open(store: &CertificateStore, kind: &'static str) -> Result<KeyStore> {
    let StoreFormat::Pkcs12 = StoreFormat::resolve(store)?;

    let failure = |reason: String| HttpClientError::CertificateStore {
        store: kind,
        path: store.path.clone(),
        reason,
    };

    let data = std::fs::read(&store.path).map_err(|e| failure(e.to_string()))?;
    let password = store.password.as_ref().map(Secret::expose).unwrap_or_default();
    KeyStore::from_pkcs12(&data, password).map_err(|e| {
        let reason = format!("unable to decode PKCS12 data (wrong password or corrupt file): {}", e);
        failure(
            store
                .password
                .as_ref()
                .map(|p| p.scrub(&reason))
                .unwrap_or(reason),
        )
    })
}

fn load_identity(store: &CertificateStore) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let keystore = open(store, KEYSTORE)?;

    for (alias, entry) in keystore.entries() {
        if let KeyStoreEntry::PrivateKeyChain(chain) = entry {
            let certs: Vec<CertificateDer<'static>> = chain
                .chain()
                .iter()
                .map(|cert| CertificateDer::from(cert.as_der().to_vec()))
                .collect();
            if certs.is_empty() {
                continue;
            }
            let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(chain.key().to_vec()));
            tracing::debug!(alias = %alias, chain_length = certs.len(), "Loaded client key entry");
            return Ok((certs, key));
        }
    }

    Err(HttpClientError::CertificateStore {
        store: KEYSTORE,
        path: store.path.clone(),
        reason: "no private key entry with a certificate chain found".to_string(),
    })
}

fn load_roots(store: &CertificateStore) -> Result<RootCertStore> {
    let truststore = open(store, TRUSTSTORE)?;

    let mut roots = RootCertStore::empty();
    for (_, entry) in truststore.entries() {
        let certs = match entry {
            KeyStoreEntry::Certificate(cert) => vec![cert.as_der()],
            KeyStoreEntry::PrivateKeyChain(chain) => chain.chain().iter().map(|c| c.as_der()).collect(),
            #[allow(unreachable_patterns)]
            _ => Vec::new(),
        };
        for der in certs {
            roots
                .add(CertificateDer::from(der.to_vec()))
                .map_err(|e| HttpClientError::CertificateStore {
                    store: TRUSTSTORE,
                    path: store.path.clone(),
                    reason: format!("invalid trusted certificate: {}", e),
                })?;
        }
    }

    if roots.is_empty() {
        return Err(HttpClientError::CertificateStore {
            store: TRUSTSTORE,
            path: store.path.clone(),
            reason: "no trusted certificates found".to_string(),
        });
    }
    Ok(roots)
}

/// A loaded client identity and the TLS configuration built from it.
///
/// Loaded once per authentication instance. The dedicated HTTP clients built
/// on top of it are created lazily, one per connect timeout, and reused.
pub struct ClientIdentity {
    tls: Arc<ClientConfig>,
    subject: Option<String>,
    clients: Mutex<HashMap<Option<Duration>, reqwest::Client>>,
}

impl ClientIdentity {
    pub fn load(keystore: &CertificateStore, truststore: Option<&CertificateStore>) -> Result<Self> {
        let (chain, key) = load_identity(keystore)?;
        let roots = truststore.map(load_roots).transpose()?;

        let leaf = parse_x509_basic(chain[0].as_ref());
        tracing::debug!(
            subject = ?leaf.subject,
            issuer = ?leaf.issuer,
            valid_to = ?leaf.valid_to,
            custom_truststore = roots.is_some(),
            "Loaded client certificate"
        );

        let tls = create_tls_config(roots, Some((chain, key)))?;
        Ok(Self {
            tls,
            subject: leaf.subject,
            clients: Mutex::new(HashMap::new()),
        })
    }

    pub fn tls_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.tls)
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Returns the client bound to this identity for `connect_timeout`,
    /// building it on first use.
    pub(crate) fn client_or_init<F>(&self, connect_timeout: Option<Duration>, build: F) -> Result<reqwest::Client>
    where
        F: FnOnce(&ClientConfig) -> Result<reqwest::Client>,
    {
        if let Some(client) = self.lock_clients().get(&connect_timeout) {
            return Ok(client.clone());
        }

        let client = build(&self.tls)?;
        let mut clients = self.lock_clients();
        if let Some(existing) = clients.get(&connect_timeout) {
            return Ok(existing.clone());
        }
        if clients.len() < MAX_CLIENTS_PER_IDENTITY {
            clients.insert(connect_timeout, client.clone());
        }
        Ok(client)
    }

    fn lock_clients(&self) -> std::sync::MutexGuard<'_, HashMap<Option<Duration>, reqwest::Client>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct IdentityKey {
    keystore: CertificateStore,
    truststore: Option<CertificateStore>,
}

/// Keeps loaded identities keyed by their store descriptors, so repeated
/// requests with the same certificate reuse one identity and its pool.
///
/// The password is part of the key: a descriptor with a different password
/// loads the files again and fails if the password is wrong.
#[derive(Debug, Default)]
pub struct IdentityCache {
    identities: Mutex<HashMap<IdentityKey, Arc<ClientIdentity>>>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(
        &self,
        keystore: &CertificateStore,
        truststore: Option<&CertificateStore>,
    ) -> Result<Arc<ClientIdentity>> {
        self.get_or_load_with(keystore, truststore, || ClientIdentity::load(keystore, truststore))
    }

    fn get_or_load_with<F>(
        &self,
        keystore: &CertificateStore,
        truststore: Option<&CertificateStore>,
        load: F,
    ) -> Result<Arc<ClientIdentity>>
    where
        F: FnOnce() -> Result<ClientIdentity>,
    {
        let key = IdentityKey {
            keystore: keystore.clone(),
            truststore: truststore.cloned(),
        };
        if let Some(identity) = self.lock().get(&key) {
            return Ok(Arc::clone(identity));
        }

        // Loading reads files; the map lock is not held meanwhile.
        let identity = Arc::new(load()?);
        let mut identities = self.lock();
        if let Some(existing) = identities.get(&key) {
            return Ok(Arc::clone(existing));
        }
        if identities.len() < MAX_CACHED_IDENTITIES {
            identities.insert(key, Arc::clone(&identity));
        } else {
            tracing::debug!(path = %keystore.path, "Identity cache full, using an uncached identity");
        }
        Ok(identity)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IdentityKey, Arc<ClientIdentity>>> {
        self.identities.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn store(path: &str, store_type: Option<&str>) -> CertificateStore {
        CertificateStore {
            path: path.to_string(),
            password: Some(Secret::new("changeit-please")),
            store_type: store_type.map(str::to_string),
        }
    }

    #[test]
    fn test_declared_unsupported_format_is_named() {
        let err = ClientIdentity::load(&store("/tmp/client.jks", Some("JKS")), None).unwrap_err();
        assert!(matches!(err, HttpClientError::UnsupportedStoreFormat { ref format } if format == "JKS"));
        assert!(err.to_string().contains("JKS"));
    }

    #[test]
    fn test_format_inferred_from_extension() {
        let err = ClientIdentity::load(&store("/tmp/client.jks", None), None).unwrap_err();
        assert!(err.to_string().contains("JKS"));

        for accepted in ["PKCS12", "p12", "Pfx"] {
            assert_eq!(
                StoreFormat::resolve(&store("/tmp/client.bin", Some(accepted))).unwrap(),
                StoreFormat::Pkcs12
            );
        }
        assert_eq!(
            StoreFormat::resolve(&store("/tmp/client.pfx", None)).unwrap(),
            StoreFormat::Pkcs12
        );
    }

    #[test]
    fn test_missing_file_does_not_leak_password() {
        let err = ClientIdentity::load(&store("/nonexistent/client.p12", None), None).unwrap_err();
        assert!(err.is_configuration_error());
        let rendered = format!("{} {:?}", err, err);
        assert!(rendered.contains("/nonexistent/client.p12"));
        assert!(!rendered.contains("changeit-please"));
    }

    #[test]
    fn test_corrupt_store_fails_with_configuration_error() {
        let mut file = tempfile::Builder::new().suffix(".p12").tempfile().unwrap();
        file.write_all(b"definitely not pkcs12").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let err = ClientIdentity::load(&store(&path, None), None).unwrap_err();
        assert!(matches!(err, HttpClientError::CertificateStore { store: KEYSTORE, .. }));
        assert!(!format!("{:?}", err).contains("changeit-please"));
    }

    #[test]
    fn test_store_descriptor_deserializes() {
        let store: CertificateStore = serde_json::from_str(
            r#"{"path":"/certs/client.p12","password":"pw","type":"PKCS12"}"#,
        )
        .unwrap();
        assert_eq!(store.store_type.as_deref(), Some("PKCS12"));
        assert!(!format!("{:?}", store).contains("pw"));
    }

    fn bare_identity() -> ClientIdentity {
        ClientIdentity {
            tls: create_tls_config(None, None).unwrap(),
            subject: Some("CN=test".to_string()),
            clients: Mutex::new(HashMap::new()),
        }
    }

    #[test]
    fn test_identity_cache_reuses_loaded_identity() {
        let cache = IdentityCache::new();
        let keystore = store("/certs/client.p12", None);
        let mut loads = 0;

        let first = cache
            .get_or_load_with(&keystore, None, || {
                loads += 1;
                Ok(bare_identity())
            })
            .unwrap();
        let second = cache
            .get_or_load_with(&keystore, None, || {
                loads += 1;
                Ok(bare_identity())
            })
            .unwrap();

        assert_eq!(loads, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_identity_cache_keys_on_password() {
        let cache = IdentityCache::new();
        let keystore = store("/certs/client.p12", None);
        let mut other_password = keystore.clone();
        other_password.password = Some(Secret::new("another-one"));

        cache.get_or_load_with(&keystore, None, || Ok(bare_identity())).unwrap();
        let err = cache
            .get_or_load_with(&other_password, None, || ClientIdentity::load(&other_password, None))
            .unwrap_err();

        assert!(err.is_configuration_error());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_identity_cache_does_not_keep_failures() {
        let cache = IdentityCache::new();
        let keystore = store("/nonexistent/client.p12", None);
        assert!(cache.get_or_load(&keystore, None).is_err());
        assert!(cache.get_or_load(&keystore, None).is_err());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_identity_client_is_built_once_per_connect_timeout() {
        let identity = bare_identity();
        let mut builds = 0;
        let mut build = |tls: &ClientConfig| {
            builds += 1;
            reqwest::Client::builder()
                .use_preconfigured_tls(tls.clone())
                .build()
                .map_err(|e| HttpClientError::Configuration(e.to_string()))
        };

        identity.client_or_init(Some(Duration::from_secs(5)), &mut build).unwrap();
        identity.client_or_init(Some(Duration::from_secs(5)), &mut build).unwrap();
        identity.client_or_init(None, &mut build).unwrap();

        assert_eq!(builds, 2);
    }
}
