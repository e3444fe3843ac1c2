//! Status route
//!
//! Reports backend node identity and repository statistics alongside local
//! index and session counts.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::error::UploadError;
use crate::state::AppState;
use crate::storage::NodeInfo;

/// Create the status router
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(status))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    node: NodeInfo,
    indexed_blobs: u64,
    active_sessions: usize,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, UploadError> {
    let node = state.backend().node_info().await?;
    let indexed_blobs = state.index().count().await?;
    let active_sessions = state.tracker().live_sessions().await;

    Ok(Json(StatusResponse {
        node,
        indexed_blobs,
        active_sessions,
    }))
}
