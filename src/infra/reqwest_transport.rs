//! Production transport backed by a pooled `reqwest::Client`.
//!
//! Redirects are re-validated against the blocklist hop by hop, the proxy for
//! every hop comes from the shared [`ProxySelector`], and in-flight
//! connections are bounded in total and per route. The permits live inside
//! the returned body, so a connection slot is released when the body is
//! dropped, whether or not it was read.

use bytes::Bytes;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use url::Url;

use super::tls::{RustlsTlsProvider, TlsProvider};
use super::transport::{BodyReader, BoxFuture, HttpTransport, TransportRequest, TransportResponse};
use crate::config::HttpClientConfig;
use crate::error::{HttpClientError, Result};
use crate::policy::{Blocklist, ProxyDecision, ProxySelector};
use crate::shared::redact_url;

pub const MAX_REDIRECTS: usize = 10;

/// Distinct connect timeouts that get their own pooled client.
const MAX_POOLED_CLIENTS: usize = 8;

type RouteMap = Arc<Mutex<HashMap<String, Arc<Semaphore>>>>;

/// Bounds concurrently open connections.
#[derive(Debug)]
struct ConnectionLimits {
    total: Arc<Semaphore>,
    per_route: RouteMap,
    per_route_limit: usize,
}

/// Both permits of one in-flight request.
struct ConnectionPermit {
    _total: OwnedSemaphorePermit,
    _route: RouteSlot,
}

/// Holds a route's semaphore while waiting for or using a permit. The route
/// entry is removed once the last slot for it is gone.
struct RouteSlot {
    permit: Option<OwnedSemaphorePermit>,
    semaphore: Arc<Semaphore>,
    route: String,
    routes: RouteMap,
}

impl Drop for RouteSlot {
    fn drop(&mut self) {
        drop(self.permit.take());
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        // The map and this slot are the only owners left.
        let idle = routes
            .get(&self.route)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.semaphore) && Arc::strong_count(entry) == 2);
        if idle {
            routes.remove(&self.route);
        }
    }
}

impl ConnectionLimits {
    fn new(total: usize, per_route_limit: usize) -> Self {
        Self {
            total: Arc::new(Semaphore::new(total)),
            per_route: Arc::new(Mutex::new(HashMap::new())),
            per_route_limit,
        }
    }

    async fn acquire(&self, url: &Url) -> Result<ConnectionPermit> {
        let route = route_key(url);
        let semaphore = {
            let mut routes = self.per_route.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                routes
                    .entry(route.clone())
                    .or_insert_with(|| Arc::new(Semaphore::new(self.per_route_limit))),
            )
        };
        let mut slot = RouteSlot {
            permit: None,
            semaphore,
            route,
            routes: Arc::clone(&self.per_route),
        };

        let closed = |_| HttpClientError::Transport("Connection pool is shut down".to_string());
        slot.permit = Some(Arc::clone(&slot.semaphore).acquire_owned().await.map_err(closed)?);
        let total = Arc::clone(&self.total).acquire_owned().await.map_err(closed)?;
        Ok(ConnectionPermit {
            _total: total,
            _route: slot,
        })
    }

    fn tracked_routes(&self) -> usize {
        self.per_route.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn route_key(url: &Url) -> String {
    format!(
        "{}://{}:{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or_default()
    )
}

pub struct ReqwestTransport {
    clients: Mutex<HashMap<Option<Duration>, reqwest::Client>>,
    tls: Arc<rustls::ClientConfig>,
    blocklist: Arc<Blocklist>,
    proxies: Arc<ProxySelector>,
    config: HttpClientConfig,
    limits: ConnectionLimits,
}

impl ReqwestTransport {
    pub fn new(
        blocklist: Arc<Blocklist>,
        proxies: Arc<ProxySelector>,
        config: HttpClientConfig,
    ) -> Result<Self> {
        Self::with_tls(blocklist, proxies, config, &RustlsTlsProvider::new())
    }

    pub fn with_tls(
        blocklist: Arc<Blocklist>,
        proxies: Arc<ProxySelector>,
        config: HttpClientConfig,
        tls: &dyn TlsProvider,
    ) -> Result<Self> {
        let tls = tls.client_config()?;
        let client = build_client(&blocklist, &proxies, &config, config.connect_timeout, &tls)?;
        let limits = ConnectionLimits::new(config.max_connections, config.max_connections_per_route);

        tracing::info!(
            max_connections = config.max_connections,
            max_connections_per_route = config.max_connections_per_route,
            "HTTP transport initialized"
        );

        Ok(Self {
            clients: Mutex::new(HashMap::from([(config.connect_timeout, client)])),
            tls,
            blocklist,
            proxies,
            config,
            limits,
        })
    }

    /// Picks the pooled client for the request's identity and connect timeout.
    fn client_for(&self, request: &TransportRequest) -> Result<reqwest::Client> {
        let connect_timeout = request.connect_timeout;
        if let Some(identity) = &request.identity {
            return identity.client_or_init(connect_timeout, |tls| {
                tracing::debug!(subject = ?identity.subject(), "Building client for certificate identity");
                build_client(&self.blocklist, &self.proxies, &self.config, connect_timeout, tls)
            });
        }

        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&connect_timeout) {
            return Ok(client.clone());
        }
        let client = build_client(&self.blocklist, &self.proxies, &self.config, connect_timeout, &self.tls)?;
        if clients.len() < MAX_POOLED_CLIENTS {
            clients.insert(connect_timeout, client.clone());
        }
        Ok(client)
    }

    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse> {
        let client = self.client_for(&request)?;
        let permits = self.limits.acquire(&request.url).await?;

        let via_proxy = matches!(request.route, ProxyDecision::Proxy(_));
        tracing::debug!(
            method = %request.method,
            url = %redact_url(&request.url),
            via_proxy,
            "Sending request"
        );

        let mut builder = client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let sending = builder.send();
        let response = match headers_deadline(request.connect_timeout, request.read_timeout) {
            Some(deadline) => tokio::time::timeout(deadline, sending)
                .await
                .map_err(|_| HttpClientError::Timeout)?,
            None => sending.await,
        }
        .map_err(map_reqwest_error)?;

        let status = response.status();
        tracing::debug!(
            status = status.as_u16(),
            final_url = %redact_url(response.url()),
            "Received response headers"
        );

        Ok(TransportResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            headers: response.headers().clone(),
            body: Box::new(ReqwestBody {
                content_length: response.content_length(),
                response,
                read_timeout: request.read_timeout,
                _permits: permits,
            }),
        })
    }
}

/// Bound on connect, TLS and the wait for response headers.
///
/// The read timeout alone bounds the header wait; the connect timeout is
/// enforced by the client and only widens the deadline when both are set.
fn headers_deadline(connect: Option<Duration>, read: Option<Duration>) -> Option<Duration> {
    read.map(|read| read + connect.unwrap_or_default())
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse>> {
        Box::pin(self.execute(request))
    }
}

struct ReqwestBody {
    response: reqwest::Response,
    content_length: Option<u64>,
    read_timeout: Option<Duration>,
    _permits: ConnectionPermit,
}

impl BodyReader for ReqwestBody {
    fn next_chunk(&mut self) -> BoxFuture<'_, Result<Option<Bytes>>> {
        Box::pin(async move {
            let chunk = self.response.chunk();
            let chunk = match self.read_timeout {
                Some(limit) => tokio::time::timeout(limit, chunk)
                    .await
                    .map_err(|_| HttpClientError::Timeout)?,
                None => chunk.await,
            };
            chunk.map_err(map_reqwest_error)
        })
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}

fn build_client(
    blocklist: &Arc<Blocklist>,
    proxies: &Arc<ProxySelector>,
    config: &HttpClientConfig,
    connect_timeout: Option<Duration>,
    tls: &rustls::ClientConfig,
) -> Result<reqwest::Client> {
    let redirect_blocklist = Arc::clone(blocklist);
    let redirects = reqwest::redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error(HttpClientError::Transport(format!(
                "Too many redirects (more than {})",
                MAX_REDIRECTS
            )));
        }
        match redirect_blocklist.validate_url(attempt.url()) {
            Ok(()) => attempt.follow(),
            Err(blocked) => attempt.error(blocked),
        }
    });

    let selector = Arc::clone(proxies);
    let proxy = reqwest::Proxy::custom(move |url| match selector.select(url) {
        ProxyDecision::Direct => None,
        ProxyDecision::Proxy(endpoint) => match endpoint.to_url() {
            Ok(proxy_url) => Some(proxy_url),
            Err(e) => {
                tracing::warn!(proxy = %endpoint, error = %e, "Ignoring unusable proxy endpoint");
                None
            }
        },
    });

    let mut builder = reqwest::Client::builder()
        .use_preconfigured_tls(tls.clone())
        .redirect(redirects)
        .no_proxy()
        .proxy(proxy)
        .pool_max_idle_per_host(config.max_connections_per_route)
        .tcp_keepalive(Duration::from_secs(60));
    if let Some(connect) = connect_timeout {
        builder = builder.connect_timeout(connect);
    }

    builder
        .build()
        .map_err(|e| HttpClientError::Configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Maps a reqwest failure, recovering policy errors raised by the redirect policy.
fn map_reqwest_error(err: reqwest::Error) -> HttpClientError {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(policy) = cause.downcast_ref::<HttpClientError>() {
            return match policy {
                HttpClientError::Blocked { rule } => HttpClientError::Blocked { rule: rule.clone() },
                other => HttpClientError::Transport(other.to_string()),
            };
        }
        source = cause.source();
    }

    if err.is_timeout() {
        HttpClientError::Timeout
    } else if err.is_connect() {
        HttpClientError::Connection(err.without_url().to_string())
    } else {
        HttpClientError::Transport(err.without_url().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_key_uses_default_port() {
        let url = Url::parse("https://Example.com/path").unwrap();
        assert_eq!(route_key(&url), "https://example.com:443");
    }

    #[tokio::test]
    async fn test_connection_limits_release_on_drop() {
        let limits = ConnectionLimits::new(2, 1);
        let url = Url::parse("http://a.example/").unwrap();
        let other = Url::parse("http://b.example/").unwrap();

        let first = limits.acquire(&url).await.unwrap();
        assert_eq!(limits.total.available_permits(), 1);

        let blocked = tokio::time::timeout(Duration::from_millis(20), limits.acquire(&url)).await;
        assert!(blocked.is_err());

        let second = limits.acquire(&other).await.unwrap();
        assert_eq!(limits.total.available_permits(), 0);

        drop(first);
        drop(second);
        assert_eq!(limits.total.available_permits(), 2);
        assert!(limits.acquire(&url).await.is_ok());
    }

    #[tokio::test]
    async fn test_idle_routes_are_reclaimed() {
        let limits = ConnectionLimits::new(8, 1);
        let url = Url::parse("http://a.example/").unwrap();

        let held = limits.acquire(&url).await.unwrap();
        let other = limits.acquire(&Url::parse("http://b.example/").unwrap()).await.unwrap();
        assert_eq!(limits.tracked_routes(), 2);

        // A waiter that gives up keeps nothing alive.
        let waiting = tokio::time::timeout(Duration::from_millis(20), limits.acquire(&url)).await;
        assert!(waiting.is_err());
        assert_eq!(limits.tracked_routes(), 2);

        drop(other);
        assert_eq!(limits.tracked_routes(), 1);
        drop(held);
        assert_eq!(limits.tracked_routes(), 0);
        assert_eq!(limits.total.available_permits(), 8);
    }

    #[tokio::test]
    async fn test_busy_route_survives_release_of_one_permit() {
        let limits = ConnectionLimits::new(8, 2);
        let url = Url::parse("https://api.example/").unwrap();

        let first = limits.acquire(&url).await.unwrap();
        let second = limits.acquire(&url).await.unwrap();
        drop(first);
        assert_eq!(limits.tracked_routes(), 1);
        drop(second);
        assert_eq!(limits.tracked_routes(), 0);
    }

    #[test]
    fn test_headers_deadline() {
        let secs = Duration::from_secs;
        assert_eq!(headers_deadline(None, Some(secs(1))), Some(secs(1)));
        assert_eq!(headers_deadline(Some(secs(2)), Some(secs(1))), Some(secs(3)));
        assert_eq!(headers_deadline(Some(secs(2)), None), None);
        assert_eq!(headers_deadline(None, None), None);
    }

    #[tokio::test]
    async fn test_client_reused_per_connect_timeout() {
        let transport = ReqwestTransport::new(
            Arc::new(Blocklist::empty()),
            Arc::new(ProxySelector::direct()),
            HttpClientConfig::default(),
        )
        .unwrap();
        let url = Url::parse("http://a.example/").unwrap();
        let mut request = TransportRequest::new(http::Method::GET, url);

        request.connect_timeout = Some(Duration::from_secs(3));
        transport.client_for(&request).unwrap();
        transport.client_for(&request).unwrap();
        request.connect_timeout = None;
        transport.client_for(&request).unwrap();

        // The default connect timeout plus the two requested ones.
        assert_eq!(transport.clients.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_builds_with_defaults() {
        let transport = ReqwestTransport::new(
            Arc::new(Blocklist::empty()),
            Arc::new(ProxySelector::direct()),
            HttpClientConfig::default(),
        );
        assert!(transport.is_ok());
    }
}
