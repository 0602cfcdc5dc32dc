//! Execution engine.
//!
//! One invocation runs: URL resolution and blocklist validation, proxy
//! decision, authentication, a single transport call, bounded body handling
//! and result mapping. Any failing step short-circuits the rest. The engine
//! keeps no per-request state; the token cache and the transport's pool are
//! the only shared resources.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use http::{HeaderMap, Method};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use super::mapper::{map_success, status_error};
use super::response::StreamingResponse;
use super::types::{HttpClientRequest, HttpClientResult, RequestBody, ResultShape};
use crate::auth::{
    self, Authentication, AuthenticationConfig, CachedToken, IdentityCache, OAuthClientCredentials, TokenCache,
    TokenOrigin, TokenRequest, TokenResponse,
};
use crate::config::HttpClientConfig;
use crate::error::{HttpClientError, Result};
use crate::infra::{DocumentStore, HttpTransport, ReqwestTransport, TransportRequest};
use crate::policy::{Blocklist, ProxySelector};
use crate::shared::redact_url;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

pub struct HttpExecutor {
    blocklist: Arc<Blocklist>,
    proxies: Arc<ProxySelector>,
    authentication: Authentication,
    config: HttpClientConfig,
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenCache>,
    identities: Arc<IdentityCache>,
    documents: Option<Arc<dyn DocumentStore>>,
}

/// Token in use for one invocation, kept to invalidate it on a 401.
struct BearerToken {
    oauth: Arc<OAuthClientCredentials>,
    token: Arc<CachedToken>,
    origin: TokenOrigin,
}

impl HttpExecutor {
    /// Builds an executor on the pooled reqwest transport.
    pub fn new(
        blocklist: Blocklist,
        proxies: ProxySelector,
        authentication: Authentication,
        config: HttpClientConfig,
    ) -> Result<Self> {
        let blocklist = Arc::new(blocklist);
        let proxies = Arc::new(proxies);
        let transport = ReqwestTransport::new(Arc::clone(&blocklist), Arc::clone(&proxies), config.clone())?;
        Ok(Self::assemble(blocklist, proxies, authentication, config, Arc::new(transport)))
    }

    pub fn with_transport(
        blocklist: Blocklist,
        proxies: ProxySelector,
        authentication: Authentication,
        config: HttpClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self::assemble(
            Arc::new(blocklist),
            Arc::new(proxies),
            authentication,
            config,
            transport,
        )
    }

    /// Loads blocklist, proxy settings and limits from the environment.
    pub fn from_env() -> Result<Self> {
        Self::new(
            Blocklist::from_env(),
            ProxySelector::from_env()?,
            Authentication::None,
            HttpClientConfig::from_env()?,
        )
    }

    fn assemble(
        blocklist: Arc<Blocklist>,
        proxies: Arc<ProxySelector>,
        authentication: Authentication,
        config: HttpClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            blocklist,
            proxies,
            authentication,
            config,
            transport,
            tokens: Arc::new(TokenCache::new()),
            identities: Arc::new(IdentityCache::new()),
            documents: None,
        }
    }

    /// Shares `tokens` with per-request OAuth descriptors.
    pub fn with_token_cache(mut self, tokens: Arc<TokenCache>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_document_store(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn token_cache(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Certificate identities loaded for per-request descriptors.
    pub fn identity_cache(&self) -> &Arc<IdentityCache> {
        &self.identities
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    /// Executes `request` with its own authentication descriptor, or the
    /// executor's default authentication when it has none.
    pub async fn execute(&self, request: &HttpClientRequest, shape: ResultShape) -> Result<HttpClientResult> {
        let authentication = match &request.authentication {
            Some(AuthenticationConfig::Certificate { keystore, truststore }) => {
                Authentication::Certificate(self.identities.get_or_load(keystore, truststore.as_ref())?)
            }
            Some(config) => Authentication::from_config(config, &self.tokens)?,
            None => self.authentication.clone(),
        };
        self.execute_with(request, &authentication, shape).await
    }

    pub async fn execute_with(
        &self,
        request: &HttpClientRequest,
        authentication: &Authentication,
        shape: ResultShape,
    ) -> Result<HttpClientResult> {
        let response = self.send(request, authentication).await?;
        if !response.head.is_success() {
            return Err(status_error(response).await);
        }
        map_success(response, shape, request.store_response, self.documents.as_deref()).await
    }

    /// Sends `request` and returns the response with its body unread.
    pub async fn send(&self, request: &HttpClientRequest, authentication: &Authentication) -> Result<StreamingResponse> {
        let mut url = resolve_url(request)?;
        self.blocklist.validate_url(&url)?;

        let route = self.proxies.select(&url);

        let mut headers = request_headers(request)?;
        let body = if request.method.supports_body() {
            encode_body(request.payload()?, &mut headers)?
        } else {
            if request.payload()?.is_some() {
                tracing::debug!(method = ?request.method, "Ignoring body for method without payload");
            }
            None
        };

        tracing::debug!(
            method = ?request.method,
            url = %redact_url(&url),
            auth = authentication.kind(),
            "Executing request"
        );

        authentication.apply_static(&mut headers, &mut url)?;

        let connect_timeout = request.connect_timeout(self.config.connect_timeout);
        let read_timeout = request.read_timeout(self.config.read_timeout);
        let prepared = TransportRequest {
            method: request.method.as_method(),
            url,
            headers,
            body,
            connect_timeout,
            read_timeout,
            route,
            identity: authentication.identity().cloned(),
        };

        let bearer = match authentication.oauth() {
            Some(oauth) => Some(self.bearer_token(oauth, &prepared).await?),
            None => None,
        };

        let response = self.dispatch(prepared.clone(), bearer.as_ref()).await?;

        match bearer {
            Some(bearer) if response.status() == 401 && bearer.origin == TokenOrigin::Cached => {
                tracing::info!("Cached OAuth token rejected, retrying once with a fresh token");
                drop(response);
                bearer.oauth.invalidate(&bearer.token);
                let fresh = self.bearer_token(&bearer.oauth, &prepared).await?;
                self.dispatch(prepared, Some(&fresh)).await
            }
            _ => Ok(response),
        }
    }

    async fn dispatch(&self, mut prepared: TransportRequest, bearer: Option<&BearerToken>) -> Result<StreamingResponse> {
        if let Some(bearer) = bearer {
            prepared
                .headers
                .insert(AUTHORIZATION, auth::bearer(&bearer.token.access_token)?);
        }

        let response = self.transport.send(prepared).await?;
        tracing::debug!(status = response.status, "Request completed");
        Ok(StreamingResponse::from_transport(response, self.config.max_body_size))
    }

    async fn bearer_token(&self, oauth: &Arc<OAuthClientCredentials>, outer: &TransportRequest) -> Result<BearerToken> {
        let (token, origin) = oauth
            .access_token(|token_request| self.request_token(token_request, outer))
            .await?;
        Ok(BearerToken {
            oauth: Arc::clone(oauth),
            token,
            origin,
        })
    }

    /// Sends a token request through the same policy and transport as any other request.
    async fn request_token(&self, token_request: TokenRequest, outer: &TransportRequest) -> Result<TokenResponse> {
        let TokenRequest { url, headers, body } = token_request;
        self.blocklist.validate_url(&url)?;
        let route = self.proxies.select(&url);

        let response = self
            .transport
            .send(TransportRequest {
                method: Method::POST,
                url,
                headers,
                body: Some(body),
                connect_timeout: outer.connect_timeout,
                read_timeout: outer.read_timeout,
                route,
                identity: None,
            })
            .await?;

        let response = StreamingResponse::from_transport(response, self.config.max_body_size);
        let (head, body) = response.into_parts();
        let body = body.read_bounded().await?.unwrap_or_default();
        Ok(TokenResponse {
            status: head.status,
            reason: head.reason,
            body,
        })
    }
}

/// Parses the URL and appends the request's query parameters.
fn resolve_url(request: &HttpClientRequest) -> Result<Url> {
    let mut url = Url::parse(request.url.trim())
        .map_err(|e| HttpClientError::InvalidInput(format!("Invalid URL '{}': {}", request.url, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(HttpClientError::InvalidInput(format!(
            "Unsupported URL scheme '{}'",
            url.scheme()
        )));
    }
    if !request.query_parameters.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in &request.query_parameters {
            pairs.append_pair(name, value);
        }
    }
    Ok(url)
}

fn request_headers(request: &HttpClientRequest) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for (name, values) in &request.headers {
        let header_name = HeaderName::try_from(name.as_str())
            .map_err(|_| HttpClientError::InvalidInput(format!("Invalid header name '{}'", name)))?;
        for value in values.iter() {
            let header_value = HeaderValue::from_str(value).map_err(|_| {
                HttpClientError::InvalidInput(format!("Invalid value for header '{}'", name))
            })?;
            headers.append(header_name.clone(), header_value);
        }
    }
    Ok(headers)
}

/// Encodes the payload according to the declared content type, filling in a
/// default content type when none is declared.
fn encode_body(payload: Option<RequestBody>, headers: &mut HeaderMap) -> Result<Option<Bytes>> {
    let Some(payload) = payload else {
        return Ok(None);
    };

    let declared = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_ascii_lowercase);

    let (bytes, default_type) = match payload {
        RequestBody::Bytes(bytes) => (bytes, "application/octet-stream"),
        RequestBody::Text(text) => (Bytes::from(text), "text/plain; charset=utf-8"),
        RequestBody::Json(value) => match declared.as_deref() {
            Some(ct) if ct.starts_with(FORM_CONTENT_TYPE) => (form_encode(&value)?, FORM_CONTENT_TYPE),
            Some(ct) if ct.starts_with("text/plain") && !(value.is_object() || value.is_array()) => {
                (Bytes::from(scalar_text(&value)), "text/plain")
            }
            _ => {
                let encoded = serde_json::to_vec(&value).map_err(|e| {
                    HttpClientError::InvalidInput(format!("Failed to encode JSON body: {}", e))
                })?;
                (Bytes::from(encoded), "application/json")
            }
        },
    };

    if declared.is_none() {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(default_type));
    }
    Ok(Some(bytes))
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn form_encode(value: &Value) -> Result<Bytes> {
    let Value::Object(fields) = value else {
        return Err(HttpClientError::InvalidInput(
            "A form-encoded body must be a JSON object".to_string(),
        ));
    };

    let pairs: Vec<(&str, String)> = fields
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.as_str(), scalar_text(v)))
        .collect();
    serde_urlencoded::to_string(&pairs)
        .map(Bytes::from)
        .map_err(|e| HttpClientError::InvalidInput(format!("Failed to encode form body: {}", e)))
}
