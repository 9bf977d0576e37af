//! Health check endpoint

use axum::{routing::get, Json, Router};
use serde::Serialize;

use super::server::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
}

/// GET /health
///
/// Unauthenticated.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "onair-ctl".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub fn health_routes() -> Router<AppContext> {
    Router::new().route("/health", get(health_check))
}
