//! Bounded streaming response handling.
//!
//! A [`StreamingResponse`] owns its body; every `as_*` accessor consumes the
//! response, so a body can be read at most once. Reading stops at the
//! configured ceiling: the first byte past it fails the read instead of being
//! silently truncated.

use bytes::{Bytes, BytesMut};
use http::HeaderMap;
use serde_json::{Map, Value};

use crate::error::{HttpClientError, Result};
use crate::infra::{BodyReader, TransportResponse};
use crate::shared::FlattenedHeaders;

/// Status line and headers.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: Option<String>,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First value of `name`, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn flattened_headers(&self) -> FlattenedHeaders {
        FlattenedHeaders::from_header_map(&self.headers)
    }
}

/// Unread body with its size ceiling.
pub struct ResponseBody {
    reader: Box<dyn BodyReader>,
    limit: usize,
}

impl ResponseBody {
    pub fn new(reader: Box<dyn BodyReader>, limit: usize) -> Self {
        Self { reader, limit }
    }

    /// Reads the whole body. `None` when it is empty.
    pub async fn read_bounded(mut self) -> Result<Option<Bytes>> {
        if let Some(declared) = self.reader.content_length() {
            if declared > self.limit as u64 {
                tracing::warn!(declared, limit = self.limit, "Declared response length exceeds limit");
                return Err(HttpClientError::BodyTooLarge { limit: self.limit });
            }
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.reader.next_chunk().await? {
            if buffer.len() + chunk.len() > self.limit {
                tracing::warn!(limit = self.limit, "Response body exceeds limit");
                return Err(HttpClientError::BodyTooLarge { limit: self.limit });
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok((!buffer.is_empty()).then(|| buffer.freeze()))
    }

    /// Reads at most `max` bytes. The flag is `true` when the whole body fit.
    pub async fn read_preview(mut self, max: usize) -> Result<(Bytes, bool)> {
        let max = max.min(self.limit);
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.reader.next_chunk().await? {
            let room = max - buffer.len();
            if chunk.len() > room {
                buffer.extend_from_slice(&chunk[..room]);
                return Ok((buffer.freeze(), false));
            }
            buffer.extend_from_slice(&chunk);
        }
        Ok((buffer.freeze(), true))
    }
}

/// A response whose body has not been read yet.
pub struct StreamingResponse {
    pub head: ResponseHead,
    pub body: ResponseBody,
}

impl StreamingResponse {
    pub fn new(head: ResponseHead, body: ResponseBody) -> Self {
        Self { head, body }
    }

    pub fn from_transport(response: TransportResponse, limit: usize) -> Self {
        Self {
            head: ResponseHead {
                status: response.status,
                reason: response.reason,
                headers: response.headers,
            },
            body: ResponseBody::new(response.body, limit),
        }
    }

    pub fn status(&self) -> u16 {
        self.head.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.header(name)
    }

    pub fn into_parts(self) -> (ResponseHead, ResponseBody) {
        (self.head, self.body)
    }

    pub async fn as_bytes(self) -> Result<Option<Bytes>> {
        self.body.read_bounded().await
    }

    /// Body as text. Invalid UTF-8 sequences are replaced.
    pub async fn as_string(self) -> Result<Option<String>> {
        Ok(self
            .body
            .read_bounded()
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Body as a JSON object or array. Scalars and malformed text are rejected.
    pub async fn as_json_node(self) -> Result<Option<Value>> {
        match self.as_string().await? {
            Some(text) => parse_structured_json(&text).map(Some),
            None => Ok(None),
        }
    }

    pub async fn as_json_object(self) -> Result<Option<Map<String, Value>>> {
        match self.as_json_node().await? {
            Some(Value::Object(object)) => Ok(Some(object)),
            Some(_) => Err(HttpClientError::InvalidJson(
                "expected a JSON object but got an array".to_string(),
            )),
            None => Ok(None),
        }
    }
}

/// Parses `text` when its trimmed form is a JSON object or array.
pub fn parse_structured_json(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return Err(HttpClientError::InvalidJson(
            "expected a JSON object or array".to_string(),
        ));
    }
    serde_json::from_str(trimmed).map_err(|e| HttpClientError::InvalidJson(e.to_string()))
}
