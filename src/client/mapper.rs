//! Maps handled responses to results and errors.

use bytes::Bytes;
use serde_json::Value;

use super::response::{parse_structured_json, ResponseHead, StreamingResponse};
use super::types::{HttpClientResult, MappedResult, ResultShape};
use crate::error::{HttpClientError, Result, StatusError};
use crate::infra::DocumentStore;

/// Bytes of a non-2xx body kept in the error.
pub const ERROR_BODY_PREVIEW: usize = 4096;

/// Whether `content_type` is likely binary. A missing type counts as text.
pub fn is_binary_content(content_type: Option<&str>) -> bool {
    let ct = match content_type {
        Some(ct) => ct.to_lowercase(),
        None => return false,
    };

    let text_types = [
        "text/",
        "application/json",
        "application/xml",
        "application/javascript",
        "application/x-javascript",
        "application/ecmascript",
        "application/x-www-form-urlencoded",
        "application/graphql",
        "+json",
        "+xml",
    ];

    !text_types.iter().any(|t| ct.contains(t))
}

fn is_json_content(content_type: Option<&str>) -> bool {
    content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("application/json") || ct.contains("+json")
        })
        .unwrap_or(false)
}

/// Reads a successful response into `shape`.
pub async fn map_success(
    response: StreamingResponse,
    shape: ResultShape,
    store_response: bool,
    documents: Option<&dyn DocumentStore>,
) -> Result<HttpClientResult> {
    let (head, body) = response.into_parts();

    let shape = match shape {
        ResultShape::Auto if store_response => ResultShape::Document,
        other => other,
    };

    let mapped = match shape {
        ResultShape::Void => {
            drop(body);
            MappedResult::Void
        }
        ResultShape::Bytes => body
            .read_bounded()
            .await?
            .map(MappedResult::Bytes)
            .unwrap_or(MappedResult::Void),
        ResultShape::Text => body
            .read_bounded()
            .await?
            .map(|bytes| MappedResult::Text(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(MappedResult::Void),
        ResultShape::Json => match body.read_bounded().await? {
            Some(bytes) => MappedResult::Json(parse_structured_json(&String::from_utf8_lossy(&bytes))?),
            None => MappedResult::Void,
        },
        ResultShape::Document => {
            let store = documents.ok_or_else(|| {
                HttpClientError::Configuration("No document store configured".to_string())
            })?;
            match body.read_bounded().await? {
                Some(bytes) => MappedResult::StoredDocument(
                    store
                        .store(bytes, head.content_type().map(str::to_string))
                        .await?,
                ),
                None => MappedResult::Void,
            }
        }
        ResultShape::Auto => match body.read_bounded().await? {
            Some(bytes) => auto_detect(&head, bytes),
            None => MappedResult::Void,
        },
    };

    Ok(HttpClientResult {
        status: head.status,
        reason: head.reason.clone(),
        headers: head.flattened_headers(),
        body: mapped,
    })
}

fn auto_detect(head: &ResponseHead, bytes: Bytes) -> MappedResult {
    let content_type = head.content_type();
    if is_binary_content(content_type) {
        return MappedResult::Bytes(bytes);
    }

    let text = String::from_utf8_lossy(&bytes).into_owned();
    let looks_structured = matches!(text.trim_start().chars().next(), Some('{') | Some('['));
    if is_json_content(content_type) || (content_type.is_none() && looks_structured) {
        if let Ok(value) = parse_structured_json(&text) {
            return MappedResult::Json(value);
        }
    }
    MappedResult::Text(text)
}

/// Turns a non-2xx response into a status error with a bounded body preview.
pub async fn status_error(response: StreamingResponse) -> HttpClientError {
    let (head, body) = response.into_parts();

    let preview = match body.read_preview(ERROR_BODY_PREVIEW).await {
        Ok((bytes, complete)) if !bytes.is_empty() => Some(preview_value(&bytes, complete)),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(status = head.status, error = %e, "Could not read error response body");
            None
        }
    };

    tracing::debug!(status = head.status, reason = ?head.reason, "Downstream returned an error status");

    HttpClientError::Status(Box::new(StatusError {
        status: head.status,
        reason: head.reason.clone().filter(|r| !r.is_empty()),
        headers: head.flattened_headers(),
        body: preview,
    }))
}

fn preview_value(bytes: &[u8], complete: bool) -> Value {
    if complete {
        if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
            return value;
        }
    }
    Value::String(String::from_utf8_lossy(bytes).into_owned())
}
