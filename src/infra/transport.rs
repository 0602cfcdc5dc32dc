//! Transport seam between the execution engine and the network.

use bytes::Bytes;
use http::{HeaderMap, Method};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::auth::ClientIdentity;
use crate::error::Result;
use crate::policy::ProxyDecision;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A fully prepared outbound request: already validated, routed and authenticated.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// `None` disables the timeout.
    pub connect_timeout: Option<Duration>,
    /// Applies to the wait for response headers and to each body chunk.
    pub read_timeout: Option<Duration>,
    pub route: ProxyDecision,
    pub identity: Option<Arc<ClientIdentity>>,
}

impl TransportRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            connect_timeout: None,
            read_timeout: None,
            route: ProxyDecision::Direct,
            identity: None,
        }
    }
}

/// Incremental access to a response body. Dropping the reader releases the connection.
pub trait BodyReader: Send {
    /// Next chunk, or `None` once the body is complete.
    fn next_chunk(&mut self) -> BoxFuture<'_, Result<Option<Bytes>>>;

    /// Length announced by the peer, if any.
    fn content_length(&self) -> Option<u64> {
        None
    }
}

/// Status line and headers of a response, with its unread body.
pub struct TransportResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: HeaderMap,
    pub body: Box<dyn BodyReader>,
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Performs exactly one network exchange per call.
pub trait HttpTransport: Send + Sync {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse>>;
}

impl<T: HttpTransport + ?Sized> HttpTransport for Arc<T> {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, Result<TransportResponse>> {
        (**self).send(request)
    }
}

/// Body already held in memory, served chunk by chunk.
#[derive(Debug, Default, Clone)]
pub struct BufferedBody {
    chunks: VecDeque<Bytes>,
    content_length: Option<u64>,
}

impl BufferedBody {
    pub fn new<I, B>(chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            content_length: None,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Announces `length` as the declared content length.
    pub fn with_content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }
}

impl BodyReader for BufferedBody {
    fn next_chunk(&mut self) -> BoxFuture<'_, Result<Option<Bytes>>> {
        let chunk = self.chunks.pop_front();
        Box::pin(async move { Ok(chunk) })
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_buffered_body_yields_chunks_in_order() {
        let mut body = BufferedBody::new(["ab", "cd"]);
        assert_eq!(body.next_chunk().await.unwrap(), Some(Bytes::from("ab")));
        assert_eq!(body.next_chunk().await.unwrap(), Some(Bytes::from("cd")));
        assert_eq!(body.next_chunk().await.unwrap(), None);
        assert_eq!(body.content_length(), None);
    }
}
