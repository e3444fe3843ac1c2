//! Upload Routes
//!
//! Endpoints:
//! - POST /api/v1/upload - single-shot multipart submission
//! - POST /api/v1/upload/chunked/:upload_id/chunks/:index - submit a chunk

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::UploadError;
use crate::state::AppState;
use crate::upload::{ChunkMeta, ChunkResult, PublishOptions, PublishOutcome};

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upload_single))
        .route("/chunked/{upload_id}/chunks/{index}", post(upload_chunk))
}

// ============================================================================
// Response Types
// ============================================================================

/// Metadata returned after a successful publish
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub content_hash: String,
    pub cid: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub name: String,
    pub uploaded_at: DateTime<Utc>,
    pub deduplicated: bool,
}

impl From<PublishOutcome> for PublishResponse {
    fn from(outcome: PublishOutcome) -> Self {
        Self {
            content_hash: outcome.record.content_hash,
            cid: outcome.record.cid,
            size_bytes: outcome.record.size_bytes,
            mime_type: outcome.record.mime_type,
            name: outcome.record.display_name,
            uploaded_at: outcome.record.uploaded_at,
            deduplicated: outcome.deduplicated,
        }
    }
}

/// Response after submitting a chunk
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub chunk_index: u32,

    /// True when this (uploadId, chunkIndex) pair had already been received
    pub duplicate: bool,

    pub chunks_received: u32,
    pub total_chunks: u32,

    /// True on the submission that completed the upload
    pub complete: bool,

    /// Publish result, present only when `complete` is true
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PublishResponse>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/upload
///
/// Single-shot submission. The object is the `file` multipart field; an
/// expected content hash may ride along as the `X-Content-Hash` header or a
/// `hash` field.
async fn upload_single(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<PublishResponse>, UploadError> {
    let mut claimed_hash = headers
        .get("x-content-hash")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .filter(|s| !s.is_empty());

    let size_hint = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut payload: Option<(Bytes, Option<String>, Option<String>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| UploadError::NoPayload)?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().map(str::to_string);
                let mime = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|_| UploadError::NoPayload)?;
                payload = Some((data, name, mime));
            }
            Some("hash") => {
                let value = field.text().await.map_err(|_| UploadError::NoPayload)?;
                if !value.is_empty() {
                    claimed_hash = Some(value);
                }
            }
            _ => {}
        }
    }

    let (data, name, mime) = payload.ok_or(UploadError::NoPayload)?;
    let mime = mime.unwrap_or_else(|| guess_mime(name.as_deref()));

    let outcome = state
        .publisher()
        .publish_bytes(
            &data,
            PublishOptions {
                claimed_hash,
                mime_type: Some(mime),
                name: name.clone(),
                size_hint,
            },
        )
        .await?;

    tracing::info!(
        hash = %outcome.record.content_hash,
        cid = %outcome.record.cid,
        size_bytes = outcome.record.size_bytes,
        name = name.as_deref().unwrap_or("unnamed"),
        deduplicated = outcome.deduplicated,
        "Single-shot upload complete"
    );

    Ok(Json(outcome.into()))
}

#[derive(Deserialize)]
struct ChunkParams {
    total: u32,
    name: Option<String>,
    mime: Option<String>,
    /// Expected content hash of the assembled object, recorded on the
    /// first chunk and verified after assembly
    hash: Option<String>,
}

/// POST /api/v1/upload/chunked/:upload_id/chunks/:index
///
/// Submit one chunk. The chunk data is the raw request body; `total` is
/// required on every submission and fixed by the first one. The completing
/// submission triggers assembly and publish and returns the publish result.
async fn upload_chunk(
    State(state): State<AppState>,
    Path((upload_id, index)): Path<(String, u32)>,
    Query(params): Query<ChunkParams>,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>, UploadError> {
    let meta = ChunkMeta {
        name: params.name,
        mime: params.mime,
        claimed_hash: params.hash,
    };

    let result = state
        .tracker()
        .submit_chunk(&upload_id, index, params.total, &body, meta)
        .await?;

    match result {
        ChunkResult::Duplicate { received, total } => Ok(Json(ChunkUploadResponse {
            chunk_index: index,
            duplicate: true,
            chunks_received: received,
            total_chunks: total,
            complete: false,
            result: None,
        })),
        ChunkResult::InProgress { received, total } => Ok(Json(ChunkUploadResponse {
            chunk_index: index,
            duplicate: false,
            chunks_received: received,
            total_chunks: total,
            complete: false,
            result: None,
        })),
        ChunkResult::Complete(object) => {
            let total = params.total;
            let outcome = state.publisher().publish_assembled(object).await?;

            tracing::info!(
                upload_id = %upload_id,
                hash = %outcome.record.content_hash,
                cid = %outcome.record.cid,
                deduplicated = outcome.deduplicated,
                "Chunked upload complete"
            );

            Ok(Json(ChunkUploadResponse {
                chunk_index: index,
                duplicate: false,
                chunks_received: total,
                total_chunks: total,
                complete: true,
                result: Some(outcome.into()),
            }))
        }
    }
}

/// Guess a MIME type from the submitted file name
fn guess_mime(name: Option<&str>) -> String {
    name.and_then(|n| mime_guess::from_path(n).first_raw())
        .unwrap_or("application/octet-stream")
        .to_string()
}
