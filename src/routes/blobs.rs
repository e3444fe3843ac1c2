//! Blob lookup routes
//!
//! Read-only surface over the blob index and the backend:
//! - GET /api/v1/blobs - list indexed blobs
//! - GET /api/v1/blobs/:hash - look up one record
//! - GET /api/v1/blobs/:hash/content - resolve the object bytes

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::error::UploadError;
use crate::state::AppState;
use crate::upload::BlobRecord;

/// Create the blobs router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_blobs))
        .route("/{hash}", get(get_blob))
        .route("/{hash}/content", get(get_blob_content))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlobListResponse {
    count: usize,
    blobs: Vec<BlobRecord>,
}

async fn list_blobs(State(state): State<AppState>) -> Result<Json<BlobListResponse>, UploadError> {
    let blobs = state.index().list().await?;
    Ok(Json(BlobListResponse {
        count: blobs.len(),
        blobs,
    }))
}

async fn get_blob(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<BlobRecord>, UploadError> {
    state
        .index()
        .get(&hash)
        .await?
        .map(Json)
        .ok_or(UploadError::NotFound(hash))
}

/// Serve the object bytes for an indexed blob
async fn get_blob_content(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, UploadError> {
    let record = state
        .index()
        .get(&hash)
        .await?
        .ok_or_else(|| UploadError::NotFound(hash.clone()))?;

    let data = state.backend().resolve(&record.cid).await?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.mime_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{}\"", record.display_name),
        )
        .body(Body::from(data))
        .map_err(|e| UploadError::Storage(e.to_string()))
}
