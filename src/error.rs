//! Error types for the Almacen server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::storage::BackendError;

/// Upload error types
///
/// A closed enumeration covering every failure the upload pipeline can
/// surface. Chunk duplicates are not errors and are reported through
/// `ChunkResult` instead.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no payload submitted")]
    NoPayload,

    #[error("invalid chunk parameters: index {index} of {total}")]
    InvalidChunkParameters { index: u32, total: u32 },

    #[error("payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("integrity mismatch: claimed {claimed}, computed {computed}")]
    IntegrityMismatch { claimed: String, computed: String },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("backend request timed out after {0}s")]
    BackendTimeout(u64),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NoPayload => StatusCode::BAD_REQUEST,
            Self::InvalidChunkParameters { .. } => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::IntegrityMismatch { .. } => StatusCode::CONFLICT,
            Self::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::BackendTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoPayload => "NO_PAYLOAD",
            Self::InvalidChunkParameters { .. } => "INVALID_CHUNK_PARAMETERS",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::IntegrityMismatch { .. } => "INTEGRITY_MISMATCH",
            Self::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            Self::BackendTimeout(_) => "BACKEND_TIMEOUT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Whether a caller may reasonably retry the same request
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_) | Self::BackendTimeout(_))
    }
}

impl From<BackendError> for UploadError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Unavailable(msg) => Self::BackendUnavailable(msg),
            BackendError::Timeout(secs) => Self::BackendTimeout(secs),
            BackendError::NotFound(what) => Self::NotFound(what),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        match &self {
            UploadError::Storage(msg) => tracing::error!("Storage error: {}", msg),
            UploadError::Database(msg) => tracing::error!("Database error: {}", msg),
            UploadError::BackendUnavailable(msg) => tracing::error!("Backend unavailable: {}", msg),
            UploadError::BackendTimeout(secs) => tracing::error!("Backend timed out after {}s", secs),
            _ => {}
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (self.status_code(), body).into_response()
    }
}
