//! Route modules for the Almacen server

pub mod blobs;
pub mod status;
pub mod upload;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Assemble the application router
///
/// Layers (tracing, CORS, body limits) are applied by the caller.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1/upload", upload::router())
        .nest("/api/v1/blobs", blobs::router())
        .nest("/api/v1/status", status::router())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}
