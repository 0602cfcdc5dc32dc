//! Authentication strategies.
//!
//! [`AuthenticationConfig`] is the serializable descriptor callers send;
//! [`Authentication`] is the validated runtime form. Certificate material is
//! loaded and OAuth endpoints are parsed when the runtime form is built, so a
//! bad descriptor fails before any request is attempted.

pub mod certificate;
pub mod oauth;
pub mod token_cache;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use http::header::{HeaderName, AUTHORIZATION};
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

pub use certificate::{CertificateStore, ClientIdentity, IdentityCache};
pub use oauth::{ClientAuthentication, OAuthClientCredentials, TokenRequest, TokenResponse};
pub use token_cache::{CachedToken, TokenCache, TokenKey, TokenOrigin};

use crate::error::{HttpClientError, Result};
use crate::shared::Secret;

/// Where an API key is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApiKeyLocation {
    #[default]
    Headers,
    Query,
}

/// Serializable authentication descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AuthenticationConfig {
    #[default]
    #[serde(rename = "noAuth")]
    None,
    #[serde(rename = "basic")]
    Basic { username: String, password: Secret },
    #[serde(rename = "apiKey")]
    ApiKey {
        #[serde(default)]
        location: ApiKeyLocation,
        name: String,
        value: Secret,
    },
    #[serde(rename = "bearer")]
    Bearer { token: Secret },
    #[serde(rename = "oauth-client-credentials-flow", rename_all = "camelCase")]
    OAuthClientCredentials {
        oauth_token_endpoint: String,
        client_id: String,
        client_secret: Secret,
        #[serde(default)]
        audience: Option<String>,
        #[serde(default)]
        scopes: Option<String>,
        #[serde(default)]
        client_authentication: ClientAuthentication,
    },
    #[serde(rename = "certificate", rename_all = "camelCase")]
    Certificate {
        keystore: CertificateStore,
        #[serde(default)]
        truststore: Option<CertificateStore>,
    },
}

/// Runtime authentication strategy. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub enum Authentication {
    #[default]
    None,
    Basic {
        username: String,
        password: Secret,
    },
    ApiKey {
        location: ApiKeyLocation,
        name: String,
        value: Secret,
    },
    Bearer(Secret),
    OAuth(Arc<OAuthClientCredentials>),
    Certificate(Arc<ClientIdentity>),
}

impl Authentication {
    /// Validates `config`, loading any certificate material it names.
    pub fn from_config(config: &AuthenticationConfig, tokens: &Arc<TokenCache>) -> Result<Self> {
        let authentication = match config {
            AuthenticationConfig::None => Authentication::None,
            AuthenticationConfig::Basic { username, password } => Authentication::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            AuthenticationConfig::ApiKey {
                location,
                name,
                value,
            } => {
                if name.trim().is_empty() {
                    return Err(HttpClientError::InvalidInput(
                        "API key name must not be empty".to_string(),
                    ));
                }
                Authentication::ApiKey {
                    location: *location,
                    name: name.clone(),
                    value: value.clone(),
                }
            }
            AuthenticationConfig::Bearer { token } => Authentication::Bearer(token.clone()),
            AuthenticationConfig::OAuthClientCredentials {
                oauth_token_endpoint,
                client_id,
                client_secret,
                audience,
                scopes,
                client_authentication,
            } => Authentication::OAuth(Arc::new(OAuthClientCredentials::new(
                oauth_token_endpoint,
                client_id.clone(),
                client_secret.clone(),
                audience.clone(),
                scopes.clone(),
                *client_authentication,
                Arc::clone(tokens),
            )?)),
            AuthenticationConfig::Certificate {
                keystore,
                truststore,
            } => Authentication::Certificate(Arc::new(ClientIdentity::load(
                keystore,
                truststore.as_ref(),
            )?)),
        };
        Ok(authentication)
    }

    /// Applies credentials that need no I/O: headers and query parameters.
    pub fn apply_static(&self, headers: &mut HeaderMap, url: &mut Url) -> Result<()> {
        match self {
            Authentication::Basic { username, password } => {
                let encoded = STANDARD.encode(format!("{}:{}", username, password.expose()));
                headers.insert(AUTHORIZATION, sensitive(&format!("Basic {}", encoded))?);
            }
            Authentication::ApiKey {
                location: ApiKeyLocation::Headers,
                name,
                value,
            } => {
                let name = HeaderName::try_from(name.as_str()).map_err(|_| {
                    HttpClientError::InvalidInput(format!("Invalid API key header name '{}'", name))
                })?;
                headers.insert(name, sensitive(value.expose())?);
            }
            Authentication::ApiKey {
                location: ApiKeyLocation::Query,
                name,
                value,
            } => {
                url.query_pairs_mut().append_pair(name, value.expose());
            }
            Authentication::Bearer(token) => {
                headers.insert(AUTHORIZATION, bearer(token)?);
            }
            Authentication::None | Authentication::OAuth(_) | Authentication::Certificate(_) => {}
        }
        Ok(())
    }

    pub fn oauth(&self) -> Option<&Arc<OAuthClientCredentials>> {
        match self {
            Authentication::OAuth(oauth) => Some(oauth),
            _ => None,
        }
    }

    pub fn identity(&self) -> Option<&Arc<ClientIdentity>> {
        match self {
            Authentication::Certificate(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Authentication::None => "none",
            Authentication::Basic { .. } => "basic",
            Authentication::ApiKey { .. } => "apiKey",
            Authentication::Bearer(_) => "bearer",
            Authentication::OAuth(_) => "oauth-client-credentials",
            Authentication::Certificate(_) => "certificate",
        }
    }
}

/// `Authorization: Bearer <token>`, marked sensitive.
pub fn bearer(token: &Secret) -> Result<HeaderValue> {
    sensitive(&format!("Bearer {}", token.expose()))
}

fn sensitive(value: &str) -> Result<HeaderValue> {
    let mut header = HeaderValue::from_str(value).map_err(|_| {
        HttpClientError::InvalidInput("Credential contains characters not allowed in a header".to_string())
    })?;
    header.set_sensitive(true);
    Ok(header)
}
