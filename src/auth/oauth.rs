//! OAuth 2.0 client-credentials grant.
//!
//! The grant only builds the token request and interprets the answer; sending
//! is done by the caller so the token endpoint goes through the same
//! blocklist, proxy routing and transport as every other request.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

use super::token_cache::{CachedToken, TokenCache, TokenKey, TokenOrigin};
use crate::error::{HttpClientError, Result};
use crate::shared::Secret;

/// Longest token-endpoint error body kept in an error.
const ERROR_BODY_LIMIT: usize = 1024;

/// How the client credentials are presented to the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientAuthentication {
    /// `client_id` and `client_secret` form fields.
    #[default]
    CredentialsBody,
    /// `Authorization: Basic base64(client_id:client_secret)`.
    BasicAuthHeader,
}

/// A prepared `POST` to the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Raw answer of the token endpoint.
#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub body: Bytes,
}

#[derive(Deserialize)]
struct TokenPayload {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug)]
pub struct OAuthClientCredentials {
    endpoint: Url,
    client_id: String,
    client_secret: Secret,
    audience: Option<String>,
    scopes: Option<String>,
    client_authentication: ClientAuthentication,
    cache: Arc<TokenCache>,
}

impl OAuthClientCredentials {
    pub fn new(
        endpoint: &str,
        client_id: impl Into<String>,
        client_secret: Secret,
        audience: Option<String>,
        scopes: Option<String>,
        client_authentication: ClientAuthentication,
        cache: Arc<TokenCache>,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            HttpClientError::InvalidInput(format!("Invalid OAuth token endpoint '{}': {}", endpoint, e))
        })?;
        let client_id = client_id.into();
        if client_id.is_empty() {
            return Err(HttpClientError::InvalidInput(
                "OAuth client id must not be empty".to_string(),
            ));
        }

        Ok(Self {
            endpoint,
            client_id,
            client_secret,
            audience: audience.filter(|a| !a.trim().is_empty()),
            scopes: scopes.filter(|s| !s.trim().is_empty()),
            client_authentication,
            cache,
        })
    }

    pub fn key(&self) -> TokenKey {
        TokenKey {
            endpoint: self.endpoint.to_string(),
            client_id: self.client_id.clone(),
            audience: self.audience.clone(),
            scope: self.scopes.clone(),
        }
    }

    pub fn token_request(&self) -> Result<TokenRequest> {
        let mut form: Vec<(&str, &str)> = vec![("grant_type", "client_credentials")];
        if let Some(audience) = &self.audience {
            form.push(("audience", audience));
        }
        if let Some(scopes) = &self.scopes {
            form.push(("scope", scopes));
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        match self.client_authentication {
            ClientAuthentication::CredentialsBody => {
                form.push(("client_id", &self.client_id));
                form.push(("client_secret", self.client_secret.expose()));
            }
            ClientAuthentication::BasicAuthHeader => {
                let encoded = STANDARD.encode(format!(
                    "{}:{}",
                    self.client_id,
                    self.client_secret.expose()
                ));
                let mut value = HeaderValue::from_str(&format!("Basic {}", encoded)).map_err(|_| {
                    HttpClientError::InvalidInput("OAuth client credentials contain invalid characters".to_string())
                })?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
        }

        let body = serde_urlencoded::to_string(&form).map_err(|e| {
            HttpClientError::InvalidInput(format!("Failed to encode token request: {}", e))
        })?;

        Ok(TokenRequest {
            url: self.endpoint.clone(),
            headers,
            body: Bytes::from(body),
        })
    }

    /// Interprets the token endpoint's answer.
    pub fn parse_token_response(&self, response: TokenResponse) -> Result<CachedToken> {
        if !(200..300).contains(&response.status) {
            let body = (!response.body.is_empty()).then(|| self.redacted_preview(&response.body));
            tracing::warn!(
                endpoint = %self.endpoint,
                status = response.status,
                "Token endpoint rejected client credentials request"
            );
            return Err(HttpClientError::TokenAcquisition {
                status: response.status,
                reason: response
                    .reason
                    .unwrap_or_else(|| crate::error::NO_REASON.to_string()),
                body,
            });
        }

        let payload: TokenPayload = serde_json::from_slice(&response.body).map_err(|e| {
            HttpClientError::InvalidJson(format!("Token endpoint answered with an unexpected payload: {}", e))
        })?;
        if payload.access_token.is_empty() {
            return Err(HttpClientError::InvalidJson(
                "Token endpoint answered without an access_token".to_string(),
            ));
        }

        Ok(CachedToken {
            access_token: Secret::new(payload.access_token),
            token_type: payload.token_type,
            scope: payload.scope,
            expires_at: payload
                .expires_in
                .map(|seconds| Instant::now() + Duration::from_secs(seconds)),
        })
    }

    /// Returns a usable token, sending at most one token request through `send`.
    pub async fn access_token<F, Fut>(&self, send: F) -> Result<(Arc<CachedToken>, TokenOrigin)>
    where
        F: Fn(TokenRequest) -> Fut,
        Fut: Future<Output = Result<TokenResponse>>,
    {
        let key = self.key();
        let send = &send;
        self.cache
            .get_or_fetch(&key, || async move {
                let request = self.token_request()?;
                tracing::debug!(endpoint = %self.endpoint, client_id = %self.client_id, "Requesting OAuth token");
                let response = send(request).await?;
                self.parse_token_response(response)
            })
            .await
    }

    /// Drops `token` from the shared cache after the resource server rejected it.
    pub fn invalidate(&self, token: &Arc<CachedToken>) {
        self.cache.invalidate(&self.key(), token);
    }

    /// Scrubs the whole body before cutting it, so a secret spanning the
    /// limit is never left half visible.
    fn redacted_preview(&self, body: &[u8]) -> String {
        let mut text = self.client_secret.scrub(&String::from_utf8_lossy(body));
        if text.len() > ERROR_BODY_LIMIT {
            let mut end = ERROR_BODY_LIMIT;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn credentials(mode: ClientAuthentication) -> OAuthClientCredentials {
        OAuthClientCredentials::new(
            "https://auth.example.com/oauth/token",
            "my-client",
            Secret::new("top-secret"),
            Some("api".to_string()),
            Some("read write".to_string()),
            mode,
            Arc::new(TokenCache::new()),
        )
        .unwrap()
    }

    fn ok(body: &str) -> TokenResponse {
        TokenResponse {
            status: 200,
            reason: Some("OK".to_string()),
            body: Bytes::from(body.to_string()),
        }
    }

    fn form(request: &TokenRequest) -> Vec<(String, String)> {
        serde_urlencoded::from_bytes(&request.body).unwrap()
    }

    #[test]
    fn test_credentials_in_body() {
        let request = credentials(ClientAuthentication::CredentialsBody)
            .token_request()
            .unwrap();
        let fields = form(&request);
        assert!(fields.contains(&("grant_type".into(), "client_credentials".into())));
        assert!(fields.contains(&("audience".into(), "api".into())));
        assert!(fields.contains(&("scope".into(), "read write".into())));
        assert!(fields.contains(&("client_id".into(), "my-client".into())));
        assert!(fields.contains(&("client_secret".into(), "top-secret".into())));
        assert!(request.headers.get(AUTHORIZATION).is_none());
        assert_eq!(
            request.headers[CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
    }

    #[test]
    fn test_credentials_in_basic_header() {
        let request = credentials(ClientAuthentication::BasicAuthHeader)
            .token_request()
            .unwrap();
        let fields = form(&request);
        assert!(!fields.iter().any(|(k, _)| k == "client_secret"));
        assert_eq!(
            request.headers[AUTHORIZATION],
            format!("Basic {}", STANDARD.encode("my-client:top-secret")).as_str()
        );
    }

    #[test]
    fn test_parse_success() {
        let token = credentials(ClientAuthentication::CredentialsBody)
            .parse_token_response(ok(
                r#"{"access_token":"abc","token_type":"Bearer","expires_in":3600,"scope":"read"}"#,
            ))
            .unwrap();
        assert_eq!(token.access_token.expose(), "abc");
        assert_eq!(token.scope.as_deref(), Some("read"));
        assert!(token.expires_at.is_some());
    }

    #[test]
    fn test_parse_without_expiry() {
        let token = credentials(ClientAuthentication::CredentialsBody)
            .parse_token_response(ok(r#"{"access_token":"abc"}"#))
            .unwrap();
        assert!(token.expires_at.is_none());
    }

    #[test]
    fn test_error_never_contains_secret() {
        let err = credentials(ClientAuthentication::CredentialsBody)
            .parse_token_response(TokenResponse {
                status: 401,
                reason: None,
                body: Bytes::from_static(b"{\"error\":\"invalid_client\",\"echo\":\"top-secret\"}"),
            })
            .unwrap_err();

        assert_eq!(err.error_code(), "401");
        let rendered = format!("{} {:?} {}", err, err, err.to_error_response().error_variables);
        assert!(rendered.contains("invalid_client"));
        assert!(!rendered.contains("top-secret"));
    }

    #[test]
    fn test_secret_across_preview_limit_is_not_leaked() {
        // The secret starts a few bytes before the cut.
        let mut body = "x".repeat(ERROR_BODY_LIMIT - 4);
        body.push_str("top-secret and more");
        let err = credentials(ClientAuthentication::CredentialsBody)
            .parse_token_response(TokenResponse {
                status: 400,
                reason: Some("Bad Request".to_string()),
                body: Bytes::from(body),
            })
            .unwrap_err();

        match err {
            HttpClientError::TokenAcquisition { body: Some(preview), .. } => {
                assert!(preview.len() <= ERROR_BODY_LIMIT);
                assert!(!preview.contains("top-"));
                assert!(preview.contains("***"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_non_json_success_is_invalid_json() {
        let err = credentials(ClientAuthentication::CredentialsBody)
            .parse_token_response(ok("<html/>"))
            .unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidJson(_)));
    }

    #[tokio::test]
    async fn test_access_token_uses_cache() {
        let oauth = credentials(ClientAuthentication::CredentialsBody);
        let sent = AtomicUsize::new(0);
        let send = |_request: TokenRequest| {
            sent.fetch_add(1, Ordering::SeqCst);
            async { Ok(ok(r#"{"access_token":"abc","expires_in":3600}"#)) }
        };

        let (first, origin) = oauth.access_token(send).await.unwrap();
        assert_eq!(origin, TokenOrigin::Fresh);
        let (_, origin) = oauth.access_token(send).await.unwrap();
        assert_eq!(origin, TokenOrigin::Cached);
        assert_eq!(sent.load(Ordering::SeqCst), 1);

        oauth.invalidate(&first);
        oauth.access_token(send).await.unwrap();
        assert_eq!(sent.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalid_endpoint() {
        let err = OAuthClientCredentials::new(
            "not a url",
            "id",
            Secret::new("secret"),
            None,
            None,
            ClientAuthentication::default(),
            Arc::new(TokenCache::new()),
        )
        .unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidInput(_)));
    }
}
