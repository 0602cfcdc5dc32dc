use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::shared::FlattenedHeaders;

/// Message used when a downstream response carries no reason phrase.
pub const NO_REASON: &str = "[no reason]";

pub type Result<T, E = HttpClientError> = std::result::Result<T, E>;

/// Structured details of a non-2xx downstream response.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusError {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: FlattenedHeaders,
    /// Truncated body: parsed JSON when the preview is complete valid JSON, text otherwise.
    pub body: Option<Value>,
}

impl StatusError {
    pub fn message(&self) -> &str {
        self.reason.as_deref().unwrap_or(NO_REASON)
    }
}

#[derive(Error, Debug)]
pub enum HttpClientError {
    // Configuration errors, fatal at construction
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error(
        "Unsupported certificate store format '{format}': only PKCS12 stores containing a private key and certificate chain are supported"
    )]
    UnsupportedStoreFormat { format: String },

    #[error("Failed to load {store} from '{path}': {reason}")]
    CertificateStore {
        store: &'static str,
        path: String,
        reason: String,
    },

    // Policy rejections
    #[error("The provided URL is not allowed (Block Name: {rule})")]
    Blocked { rule: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Runtime errors
    #[error("The request timed out. Please try increasing the read and connection timeouts.")]
    Timeout,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Response body exceeds the maximum allowed size of {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("Response body is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("{}", .0.message())]
    Status(Box<StatusError>),

    #[error("Failed to obtain OAuth token: {status} {reason}")]
    TokenAcquisition {
        status: u16,
        reason: String,
        body: Option<String>,
    },

    #[error("Document error: {0}")]
    Document(String),

    #[error("Request failed: {0}")]
    Transport(String),
}

impl HttpClientError {
    /// Code callers branch on. Downstream failures use the HTTP status code.
    pub fn error_code(&self) -> String {
        match self {
            HttpClientError::Configuration(_)
            | HttpClientError::UnsupportedStoreFormat { .. }
            | HttpClientError::CertificateStore { .. } => "CONFIGURATION_ERROR".to_string(),
            HttpClientError::Blocked { .. } | HttpClientError::InvalidInput(_) => {
                "INVALID_INPUT".to_string()
            }
            HttpClientError::Timeout => StatusCode::REQUEST_TIMEOUT.as_u16().to_string(),
            HttpClientError::Connection(_) => "CONNECTION_FAILED".to_string(),
            HttpClientError::BodyTooLarge { .. } => "BODY_TOO_LARGE".to_string(),
            HttpClientError::InvalidJson(_) => "INVALID_JSON".to_string(),
            HttpClientError::Status(details) => details.status.to_string(),
            HttpClientError::TokenAcquisition { status, .. } => status.to_string(),
            HttpClientError::Document(_) => "DOCUMENT_ERROR".to_string(),
            HttpClientError::Transport(_) => "REQUEST_FAILED".to_string(),
        }
    }

    /// Whether repeating the same call may succeed. Retrying is up to the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpClientError::Timeout | HttpClientError::Connection(_) => true,
            HttpClientError::Status(details) => {
                details.status == 429 || (500..600).contains(&details.status)
            }
            HttpClientError::TokenAcquisition { status, .. } => {
                *status == 429 || (500..600).contains(status)
            }
            _ => false,
        }
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            HttpClientError::Configuration(_)
                | HttpClientError::UnsupportedStoreFormat { .. }
                | HttpClientError::CertificateStore { .. }
        )
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        let error_variables = match self {
            HttpClientError::Status(details) => json!({
                "response": {
                    "headers": details.headers,
                    "body": details.body,
                }
            }),
            HttpClientError::TokenAcquisition { body, .. } => json!({
                "response": { "headers": Value::Null, "body": body }
            }),
            _ => Value::Null,
        };

        ErrorResponse {
            error_code: self.error_code(),
            error: self.to_string(),
            error_variables,
        }
    }
}

/// Serializable error shape returned to callers of the remote endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: String,
    pub error: String,
    pub error_variables: Value,
}

impl IntoResponse for HttpClientError {
    fn into_response(self) -> Response {
        let status = match &self {
            HttpClientError::Configuration(_)
            | HttpClientError::UnsupportedStoreFormat { .. }
            | HttpClientError::CertificateStore { .. }
            | HttpClientError::Document(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HttpClientError::Blocked { .. } | HttpClientError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            HttpClientError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            HttpClientError::Connection(_)
            | HttpClientError::BodyTooLarge { .. }
            | HttpClientError::InvalidJson(_)
            | HttpClientError::Status(_)
            | HttpClientError::TokenAcquisition { .. }
            | HttpClientError::Transport(_) => StatusCode::BAD_GATEWAY,
        };

        (status, Json(self.to_error_response())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{header::CONTENT_TYPE, HeaderMap, HeaderValue};

    fn status_error(status: u16, reason: Option<&str>, body: Option<Value>) -> HttpClientError {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        HttpClientError::Status(Box::new(StatusError {
            status,
            reason: reason.map(str::to_string),
            headers: FlattenedHeaders::from_header_map(&headers),
            body,
        }))
    }

    #[test]
    fn test_status_error_without_reason() {
        let err = status_error(400, None, Some(json!("text")));
        assert_eq!(err.error_code(), "400");
        assert_eq!(err.to_string(), NO_REASON);

        let response = err.to_error_response();
        assert_eq!(response.error_variables["response"]["body"], "text");
        assert_eq!(
            response.error_variables["response"]["headers"]["content-type"],
            "text/plain"
        );
    }

    #[test]
    fn test_status_error_with_reason_and_json_body() {
        let err = status_error(401, Some("Unauthorized"), Some(json!({"key": "value"})));
        assert_eq!(err.to_string(), "Unauthorized");
        let response = err.to_error_response();
        assert_eq!(response.error_code, "401");
        assert_eq!(response.error_variables["response"]["body"]["key"], "value");
    }

    #[test]
    fn test_timeout_maps_to_408() {
        let err = HttpClientError::Timeout;
        assert_eq!(err.error_code(), "408");
        assert!(err
            .to_string()
            .contains("The request timed out. Please try increasing the read and connection timeouts."));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(status_error(503, None, None).is_retryable());
        assert!(status_error(429, None, None).is_retryable());
        assert!(!status_error(404, None, None).is_retryable());
        assert!(!HttpClientError::Blocked { rule: "X".into() }.is_retryable());
        assert!(!HttpClientError::BodyTooLarge { limit: 1 }.is_retryable());
    }

    #[test]
    fn test_blocked_message_names_rule() {
        let err = HttpClientError::Blocked {
            rule: "GCP_META_DATA".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "The provided URL is not allowed (Block Name: GCP_META_DATA)"
        );
        assert_eq!(err.error_code(), "INVALID_INPUT");
    }

    #[test]
    fn test_configuration_errors() {
        let err = HttpClientError::UnsupportedStoreFormat {
            format: "JKS".to_string(),
        };
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("JKS"));
    }

    #[test]
    fn test_into_response_status_codes() {
        assert_eq!(
            HttpClientError::Timeout.into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            HttpClientError::Blocked { rule: "A".into() }
                .into_response()
                .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_error(500, None, None).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
