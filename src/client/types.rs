use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::auth::AuthenticationConfig;
use crate::error::{HttpClientError, Result};
use crate::infra::DocumentReference;
use crate::shared::FlattenedHeaders;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_method(self) -> http::Method {
        match self {
            HttpMethod::Get => http::Method::GET,
            HttpMethod::Post => http::Method::POST,
            HttpMethod::Put => http::Method::PUT,
            HttpMethod::Patch => http::Method::PATCH,
            HttpMethod::Delete => http::Method::DELETE,
            HttpMethod::Head => http::Method::HEAD,
            HttpMethod::Options => http::Method::OPTIONS,
        }
    }

    pub fn supports_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete)
    }
}

/// A request header given as one value or as a list of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValues {
    One(String),
    Many(Vec<String>),
}

impl HeaderValues {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let values: &[String] = match self {
            HeaderValues::One(value) => std::slice::from_ref(value),
            HeaderValues::Many(values) => values,
        };
        values.iter().map(String::as_str)
    }
}

/// Payload to send, after decoding the serialized request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Bytes(Bytes),
    Json(Value),
}

/// Serialized request accepted by the execution engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpClientRequest {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderValues>,
    #[serde(default)]
    pub query_parameters: BTreeMap<String, String>,
    /// Text when a JSON string, otherwise structured JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Binary payload; takes precedence over `body`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
    /// `0` disables the timeout; absent uses the configured default.
    #[serde(default)]
    pub connection_timeout_in_seconds: Option<u64>,
    /// `0` disables the timeout; absent uses the configured default.
    #[serde(default)]
    pub read_timeout_in_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationConfig>,
    #[serde(default)]
    pub store_response: bool,
}

impl HttpClientRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), HeaderValues::One(value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_parameters.insert(name.into(), value.into());
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self.body_base64 = None;
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.body = Some(Value::String(body.into()));
        self.body_base64 = None;
        self
    }

    pub fn bytes(mut self, body: &[u8]) -> Self {
        self.body_base64 = Some(STANDARD.encode(body));
        self.body = None;
        self
    }

    pub fn authentication(mut self, authentication: AuthenticationConfig) -> Self {
        self.authentication = Some(authentication);
        self
    }

    pub fn timeouts(mut self, connect_seconds: u64, read_seconds: u64) -> Self {
        self.connection_timeout_in_seconds = Some(connect_seconds);
        self.read_timeout_in_seconds = Some(read_seconds);
        self
    }

    /// Decoded payload, if any.
    pub fn payload(&self) -> Result<Option<RequestBody>> {
        if let Some(encoded) = &self.body_base64 {
            let decoded = STANDARD.decode(encoded).map_err(|e| {
                HttpClientError::InvalidInput(format!("bodyBase64 is not valid base64: {}", e))
            })?;
            return Ok(Some(RequestBody::Bytes(Bytes::from(decoded))));
        }

        Ok(match &self.body {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(RequestBody::Text(text.clone())),
            Some(other) => Some(RequestBody::Json(other.clone())),
        })
    }

    /// Effective connect timeout; `None` means no timeout.
    pub fn connect_timeout(&self, default: Option<Duration>) -> Option<Duration> {
        resolve_timeout(self.connection_timeout_in_seconds, default)
    }

    /// Effective read timeout; `None` means no timeout.
    pub fn read_timeout(&self, default: Option<Duration>) -> Option<Duration> {
        resolve_timeout(self.read_timeout_in_seconds, default)
    }
}

fn resolve_timeout(seconds: Option<u64>, default: Option<Duration>) -> Option<Duration> {
    match seconds {
        None => default,
        Some(0) => None,
        Some(seconds) => Some(Duration::from_secs(seconds)),
    }
}

/// How the body of a successful response is returned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResultShape {
    Text,
    Bytes,
    Json,
    /// Body is discarded unread.
    Void,
    Document,
    /// Document when the request asks to store the response, otherwise
    /// JSON, text or bytes depending on content.
    #[default]
    Auto,
}

/// Body of a successful response in the requested shape.
#[derive(Debug, Clone, PartialEq)]
pub enum MappedResult {
    Void,
    Text(String),
    Json(Value),
    Bytes(Bytes),
    StoredDocument(DocumentReference),
}

impl MappedResult {
    pub fn is_void(&self) -> bool {
        matches!(self, MappedResult::Void)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MappedResult::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            MappedResult::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Successful execution result.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpClientResult {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: FlattenedHeaders,
    pub body: MappedResult,
}

impl Serialize for HttpClientResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("status", &self.status)?;
        map.serialize_entry("reason", &self.reason)?;
        map.serialize_entry("headers", &self.headers)?;
        match &self.body {
            MappedResult::Void => map.serialize_entry("body", &Value::Null)?,
            MappedResult::Text(text) => map.serialize_entry("body", text)?,
            MappedResult::Json(value) => map.serialize_entry("body", value)?,
            MappedResult::Bytes(bytes) => map.serialize_entry("bodyBase64", &STANDARD.encode(bytes))?,
            MappedResult::StoredDocument(reference) => map.serialize_entry("document", reference)?,
        }
        map.end()
    }
}
