use axum::{extract::State, Json};
use serde::Deserialize;

use super::AppState;
use crate::client::{HttpClientRequest, HttpClientResult, ResultShape};
use crate::error::HttpClientError;

/// Body of `POST /api/execute`.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub request: HttpClientRequest,
    #[serde(default)]
    pub shape: ResultShape,
}

pub async fn execute_request(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRequest>,
) -> Result<Json<HttpClientResult>, HttpClientError> {
    let ExecuteRequest { request, shape } = body;
    tracing::debug!(method = ?request.method, shape = ?shape, "Executing remote request");

    match state.service.execute(request, shape).await {
        Ok(result) => {
            tracing::debug!(status = result.status, "Request succeeded");
            Ok(Json(result))
        }
        Err(e) => {
            tracing::warn!(code = %e.error_code(), message = %e, "Request failed");
            Err(e)
        }
    }
}
