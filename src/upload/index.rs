//! Blob Index
//!
//! Deduplicating map from content hash to published blob metadata. The
//! durable copy lives in SQLite; an in-memory cache serves repeat lookups.
//! Losing the cache on restart is harmless because the table is the source
//! of truth and the backend holds the bytes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::error::UploadError;

use super::types::BlobRecord;

/// Index of published blobs
#[derive(Clone)]
pub struct BlobIndex {
    inner: Arc<BlobIndexInner>,
}

struct BlobIndexInner {
    db: SqlitePool,

    /// Hash -> record cache, filled on insert and on lookup
    cache: RwLock<HashMap<String, BlobRecord>>,
}

impl BlobIndex {
    pub fn new(db: SqlitePool) -> Self {
        Self {
            inner: Arc::new(BlobIndexInner {
                db,
                cache: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Insert a record if its hash is absent
    ///
    /// Inserting a hash that already exists is a silent no-op; the stored
    /// record stays authoritative. The primary-key constraint makes the
    /// insert atomic with respect to concurrent puts for the same hash.
    pub async fn put(&self, record: BlobRecord) -> Result<(), UploadError> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO blobs
                (content_hash, cid, size_bytes, mime_type, display_name, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.content_hash)
        .bind(&record.cid)
        .bind(record.size_bytes as i64)
        .bind(&record.mime_type)
        .bind(&record.display_name)
        .bind(record.uploaded_at.timestamp())
        .execute(&self.inner.db)
        .await
        .map_err(|e| UploadError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            tracing::debug!(
                hash = %record.content_hash,
                "Blob already indexed, keeping existing record"
            );
            if let Some(existing) = self.fetch(&record.content_hash).await? {
                let mut cache = self.inner.cache.write().await;
                cache.insert(existing.content_hash.clone(), existing);
            }
            return Ok(());
        }

        {
            let mut cache = self.inner.cache.write().await;
            cache.insert(record.content_hash.clone(), record);
        }

        Ok(())
    }

    /// Look up a record by content hash
    pub async fn get(&self, hash: &str) -> Result<Option<BlobRecord>, UploadError> {
        {
            let cache = self.inner.cache.read().await;
            if let Some(record) = cache.get(hash) {
                return Ok(Some(record.clone()));
            }
        }

        let record = self.fetch(hash).await?;

        if let Some(ref found) = record {
            let mut cache = self.inner.cache.write().await;
            cache.insert(found.content_hash.clone(), found.clone());
        }

        Ok(record)
    }

    /// Snapshot of all records, most recent first
    pub async fn list(&self) -> Result<Vec<BlobRecord>, UploadError> {
        let rows = sqlx::query_as::<_, BlobRow>(
            r#"
            SELECT content_hash, cid, size_bytes, mime_type, display_name, uploaded_at
            FROM blobs
            ORDER BY uploaded_at DESC
            "#,
        )
        .fetch_all(&self.inner.db)
        .await
        .map_err(|e| UploadError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(record_from_row).collect())
    }

    /// Number of indexed blobs
    pub async fn count(&self) -> Result<u64, UploadError> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM blobs")
            .fetch_one(&self.inner.db)
            .await
            .map_err(|e| UploadError::Database(e.to_string()))?;

        Ok(count as u64)
    }

    /// Warm the cache with the most recently published blobs
    pub async fn preload_cache(&self, limit: usize) -> Result<usize, UploadError> {
        let rows = sqlx::query_as::<_, BlobRow>(
            r#"
            SELECT content_hash, cid, size_bytes, mime_type, display_name, uploaded_at
            FROM blobs
            ORDER BY uploaded_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.inner.db)
        .await
        .map_err(|e| UploadError::Database(e.to_string()))?;

        let count = rows.len();
        let mut cache = self.inner.cache.write().await;
        for row in rows {
            let record = record_from_row(row);
            cache.insert(record.content_hash.clone(), record);
        }

        Ok(count)
    }

    async fn fetch(&self, hash: &str) -> Result<Option<BlobRecord>, UploadError> {
        let row = sqlx::query_as::<_, BlobRow>(
            r#"
            SELECT content_hash, cid, size_bytes, mime_type, display_name, uploaded_at
            FROM blobs
            WHERE content_hash = ?
            "#,
        )
        .bind(hash)
        .fetch_optional(&self.inner.db)
        .await
        .map_err(|e| UploadError::Database(e.to_string()))?;

        Ok(row.map(record_from_row))
    }
}

type BlobRow = (String, String, i64, String, String, i64);

fn record_from_row(row: BlobRow) -> BlobRecord {
    let (content_hash, cid, size_bytes, mime_type, display_name, uploaded_at) = row;
    BlobRecord {
        content_hash,
        cid,
        size_bytes: size_bytes as u64,
        mime_type,
        display_name,
        uploaded_at: DateTime::<Utc>::from_timestamp(uploaded_at, 0).unwrap_or_default(),
    }
}

// ============================================================================
// Tests
// ============================================================================
