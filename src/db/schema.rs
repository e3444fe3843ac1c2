//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::UploadError;

const CREATE_BLOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blobs (
    content_hash TEXT PRIMARY KEY,
    cid TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    mime_type TEXT NOT NULL,
    display_name TEXT NOT NULL,
    uploaded_at INTEGER NOT NULL
)
"#;

const CREATE_UPLOADED_AT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_blobs_uploaded_at ON blobs(uploaded_at)
"#;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), UploadError> {
    sqlx::query(CREATE_BLOBS_TABLE)
        .execute(pool)
        .await
        .map_err(|e| UploadError::Database(e.to_string()))?;

    sqlx::query(CREATE_UPLOADED_AT_INDEX)
        .execute(pool)
        .await
        .map_err(|e| UploadError::Database(e.to_string()))?;

    Ok(())
}
