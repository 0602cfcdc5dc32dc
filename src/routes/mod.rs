//! Remote execution endpoint.

pub mod execute;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::client::HttpService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<dyn HttpService>,
}

pub fn router(service: Arc<dyn HttpService>) -> Router {
    Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/execute", post(execute::execute_request))
        .with_state(AppState { service })
}
