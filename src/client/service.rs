//! Service abstraction over the execution engine.
//!
//! The remote endpoint depends on [`HttpService`] rather than on
//! [`HttpExecutor`] directly, so handlers can be tested against a mock.

use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

use super::executor::HttpExecutor;
use super::types::{HttpClientRequest, HttpClientResult, HttpMethod, ResultShape};
use crate::error::Result;

pub trait HttpService: Send + Sync {
    /// Executes `request` and maps a successful response into `shape`.
    fn execute(
        &self,
        request: HttpClientRequest,
        shape: ResultShape,
    ) -> Pin<Box<dyn Future<Output = Result<HttpClientResult>> + Send + '_>>;
}

impl HttpService for HttpExecutor {
    fn execute(
        &self,
        request: HttpClientRequest,
        shape: ResultShape,
    ) -> Pin<Box<dyn Future<Output = Result<HttpClientResult>> + Send + '_>> {
        Box::pin(async move { HttpExecutor::execute(self, &request, shape).await })
    }
}

/// Convenience methods for any [`HttpService`].
pub trait HttpServiceExt: HttpService {
    fn get(&self, url: &str) -> Pin<Box<dyn Future<Output = Result<HttpClientResult>> + Send + '_>> {
        self.execute(HttpClientRequest::new(HttpMethod::Get, url), ResultShape::Auto)
    }

    fn post(
        &self,
        url: &str,
        body: Value,
    ) -> Pin<Box<dyn Future<Output = Result<HttpClientResult>> + Send + '_>> {
        self.execute(
            HttpClientRequest::new(HttpMethod::Post, url).json(body),
            ResultShape::Auto,
        )
    }
}

impl<T: HttpService + ?Sized> HttpServiceExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::types::MappedResult;
    use crate::error::HttpClientError;
    use crate::shared::FlattenedHeaders;
    use serde_json::json;
    use std::sync::Mutex;

    struct MockHttpService {
        seen: Mutex<Vec<HttpClientRequest>>,
    }

    impl HttpService for MockHttpService {
        fn execute(
            &self,
            request: HttpClientRequest,
            _shape: ResultShape,
        ) -> Pin<Box<dyn Future<Output = Result<HttpClientResult>> + Send + '_>> {
            let blocked = request.url.contains("blocked");
            self.seen.lock().unwrap().push(request);
            Box::pin(async move {
                if blocked {
                    return Err(HttpClientError::Blocked { rule: "TEST".to_string() });
                }
                Ok(HttpClientResult {
                    status: 200,
                    reason: Some("OK".to_string()),
                    headers: FlattenedHeaders::default(),
                    body: MappedResult::Json(json!({"ok": true})),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_ext_methods_build_requests() {
        let service = MockHttpService { seen: Mutex::new(Vec::new()) };

        let result = service.get("https://example.com").await.unwrap();
        assert_eq!(result.status, 200);

        service.post("https://example.com/items", json!({"a": 1})).await.unwrap();
        let err = service.get("https://blocked.example").await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_INPUT");

        let seen = service.seen.lock().unwrap();
        assert_eq!(seen[0].method, HttpMethod::Get);
        assert_eq!(seen[1].method, HttpMethod::Post);
        assert_eq!(seen[1].body, Some(json!({"a": 1})));
    }
}
