//! Upload Publisher
//!
//! Ties the verifier, blob index, and storage backend together: objects are
//! buffered to spool storage, their digest computed (and checked against a
//! claimed hash when one was supplied), then published to the backend at
//! most once per content hash. The check-then-publish-then-insert sequence
//! for one hash runs under a per-hash lock so concurrent first-time uploads
//! of identical bytes cannot double-publish.
//!
//! Every path, success or failure, deletes the spooled object before
//! returning.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::UploadError;
use crate::hash;
use crate::storage::ContentBackend;

use super::index::BlobIndex;
use super::types::{AssembledObject, BlobRecord};

/// Options for a single-shot publish
#[derive(Debug, Default)]
pub struct PublishOptions {
    /// Expected content hash; when present the payload is verified against
    /// it before anything is sent to the backend
    pub claimed_hash: Option<String>,
    pub mime_type: Option<String>,
    pub name: Option<String>,
    /// Declared length, checked against the size limit before buffering
    pub size_hint: Option<u64>,
}

/// Result of a publish
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub record: BlobRecord,
    /// True when the content hash was already indexed and the backend was
    /// not called
    pub deduplicated: bool,
}

/// Publishes assembled objects into the storage backend
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    backend: Arc<dyn ContentBackend>,
    index: BlobIndex,
    spool_dir: PathBuf,
    max_object_size: u64,

    /// Per-hash single-flight locks for in-flight publishes
    inflight: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl Publisher {
    pub fn new(
        backend: Arc<dyn ContentBackend>,
        index: BlobIndex,
        spool_dir: PathBuf,
        max_object_size: u64,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                backend,
                index,
                spool_dir,
                max_object_size,
                inflight: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Publish a single-shot submission
    pub async fn publish_bytes(
        &self,
        data: &[u8],
        opts: PublishOptions,
    ) -> Result<PublishOutcome, UploadError> {
        if data.is_empty() {
            return Err(UploadError::NoPayload);
        }

        if let Some(hint) = opts.size_hint {
            if hint > self.inner.max_object_size {
                return Err(UploadError::PayloadTooLarge {
                    size: hint,
                    max: self.inner.max_object_size,
                });
            }
        }
        if data.len() as u64 > self.inner.max_object_size {
            return Err(UploadError::PayloadTooLarge {
                size: data.len() as u64,
                max: self.inner.max_object_size,
            });
        }

        tokio::fs::create_dir_all(&self.inner.spool_dir)
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;

        let path = self
            .inner
            .spool_dir
            .join(format!("publish-{}.bin", Uuid::new_v4()));
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;

        let object = AssembledObject {
            path,
            size_bytes: data.len() as u64,
            original_name: opts.name.unwrap_or_else(|| "unnamed".to_string()),
            mime_type: opts
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            claimed_hash: opts.claimed_hash,
        };

        self.publish_object(object).await
    }

    /// Publish an object assembled by the chunk tracker
    ///
    /// Takes ownership of the spooled object and removes it before
    /// returning, whatever the outcome.
    pub async fn publish_assembled(
        &self,
        object: AssembledObject,
    ) -> Result<PublishOutcome, UploadError> {
        if object.size_bytes > self.inner.max_object_size {
            let size = object.size_bytes;
            self.discard(&object).await;
            return Err(UploadError::PayloadTooLarge {
                size,
                max: self.inner.max_object_size,
            });
        }

        self.publish_object(object).await
    }

    async fn publish_object(
        &self,
        object: AssembledObject,
    ) -> Result<PublishOutcome, UploadError> {
        let result = self.verify_and_publish(&object).await;
        self.discard(&object).await;
        result
    }

    async fn verify_and_publish(
        &self,
        object: &AssembledObject,
    ) -> Result<PublishOutcome, UploadError> {
        let computed = hash::hash_file(&object.path)
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;

        // Verification mode: a mismatch fails before any backend interaction
        if let Some(claimed) = &object.claimed_hash {
            hash::verify_hash(claimed, &computed)?;
        }

        let lock = self.hash_lock(&computed).await;
        let result = {
            let _guard = lock.clone().lock_owned().await;
            self.publish_locked(object, &computed).await
        };
        drop(lock);
        self.prune_lock(&computed).await;

        result
    }

    /// The critical section: holds the per-hash lock across check, backend
    /// publish, and index insert
    async fn publish_locked(
        &self,
        object: &AssembledObject,
        content_hash: &str,
    ) -> Result<PublishOutcome, UploadError> {
        if let Some(existing) = self.inner.index.get(content_hash).await? {
            tracing::info!(
                hash = %content_hash,
                cid = %existing.cid,
                "Duplicate content, skipping backend publish"
            );
            return Ok(PublishOutcome {
                record: existing,
                deduplicated: true,
            });
        }

        let data = tokio::fs::read(&object.path)
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;

        let cid = self
            .inner
            .backend
            .add_object(data, object.size_bytes, &object.mime_type)
            .await?;

        let record = BlobRecord {
            content_hash: content_hash.to_string(),
            cid,
            size_bytes: object.size_bytes,
            mime_type: object.mime_type.clone(),
            display_name: object.original_name.clone(),
            uploaded_at: Utc::now(),
        };

        self.inner.index.put(record.clone()).await?;

        tracing::info!(
            hash = %content_hash,
            cid = %record.cid,
            size_bytes = record.size_bytes,
            name = %record.display_name,
            "Published object to backend"
        );

        Ok(PublishOutcome {
            record,
            deduplicated: false,
        })
    }

    async fn discard(&self, object: &AssembledObject) {
        if let Err(e) = tokio::fs::remove_file(&object.path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %object.path.display(),
                    error = %e,
                    "Failed to remove spooled object"
                );
            }
        }
    }

    async fn hash_lock(&self, content_hash: &str) -> Arc<Mutex<()>> {
        {
            let inflight = self.inner.inflight.read().await;
            if let Some(lock) = inflight.get(content_hash) {
                return lock.clone();
            }
        }

        let mut inflight = self.inner.inflight.write().await;
        inflight
            .entry(content_hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock entry once nothing else holds a reference to it
    async fn prune_lock(&self, content_hash: &str) {
        let mut inflight = self.inner.inflight.write().await;
        let unused = inflight
            .get(content_hash)
            .map(|lock| Arc::strong_count(lock) == 1)
            .unwrap_or(false);
        if unused {
            inflight.remove(content_hash);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::compute_hash;
    use crate::storage::{BackendError, NodeInfo};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct MockBackend {
        adds: AtomicUsize,
        objects: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MockBackend {
        fn new() -> Self {
            Self {
                adds: AtomicUsize::new(0),
                objects: Mutex::new(HashMap::new()),
            }
        }

        fn add_count(&self) -> usize {
            self.adds.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl ContentBackend for MockBackend {
        async fn add_object(
            &self,
            data: Vec<u8>,
            _size_hint: u64,
            _mime_type: &str,
        ) -> Result<String, BackendError> {
            self.adds.fetch_add(1, Ordering::SeqCst);
            let cid = format!("bafy-mock-{}", &compute_hash(&data)[..16]);
            self.objects.lock().await.insert(cid.clone(), data);
            Ok(cid)
        }

        async fn resolve(&self, cid: &str) -> Result<Vec<u8>, BackendError> {
            self.objects
                .lock()
                .await
                .get(cid)
                .cloned()
                .ok_or_else(|| BackendError::NotFound(cid.to_string()))
        }

        async fn node_info(&self) -> Result<NodeInfo, BackendError> {
            Ok(NodeInfo {
                peer_id: "mock".to_string(),
                version: "mock".to_string(),
                addresses: vec![],
                repo_objects: 0,
                repo_size: 0,
            })
        }
    }

    async fn test_publisher(
        dir: &TempDir,
        max: u64,
    ) -> (Publisher, Arc<MockBackend>, BlobIndex) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::initialize_schema(&pool).await.unwrap();

        let backend = Arc::new(MockBackend::new());
        let index = BlobIndex::new(pool);
        let publisher = Publisher::new(
            backend.clone(),
            index.clone(),
            dir.path().to_path_buf(),
            max,
        );
        (publisher, backend, index)
    }

    fn spool_is_empty(dir: &TempDir) -> bool {
        std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .all(|e| e.path().is_dir())
    }

    #[tokio::test]
    async fn test_publish_and_dedup() {
        let dir = TempDir::new().unwrap();
        let (publisher, backend, index) = test_publisher(&dir, 1024).await;

        let first = publisher
            .publish_bytes(b"hello", PublishOptions::default())
            .await
            .unwrap();
        assert!(!first.deduplicated);
        assert_eq!(first.record.content_hash, compute_hash(b"hello"));
        assert_eq!(backend.add_count(), 1);

        // Same bytes again: same record, no second backend call
        let second = publisher
            .publish_bytes(b"hello", PublishOptions::default())
            .await
            .unwrap();
        assert!(second.deduplicated);
        assert_eq!(second.record.cid, first.record.cid);
        assert_eq!(backend.add_count(), 1);

        assert_eq!(index.count().await.unwrap(), 1);
        assert!(spool_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_concurrent_publishes_single_flight() {
        let dir = TempDir::new().unwrap();
        let (publisher, backend, index) = test_publisher(&dir, 1024).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let publisher = publisher.clone();
                tokio::spawn(async move {
                    publisher
                        .publish_bytes(b"same content", PublishOptions::default())
                        .await
                })
            })
            .collect();

        let outcomes = futures::future::join_all(tasks).await;
        let mut cids = Vec::new();
        for outcome in outcomes {
            cids.push(outcome.unwrap().unwrap().record.cid);
        }

        assert_eq!(backend.add_count(), 1);
        assert!(cids.iter().all(|c| c == &cids[0]));
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_claimed_hash_verified() {
        let dir = TempDir::new().unwrap();
        let (publisher, backend, index) = test_publisher(&dir, 1024).await;

        let good = publisher
            .publish_bytes(
                b"hello",
                PublishOptions {
                    claimed_hash: Some(compute_hash(b"hello")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!good.deduplicated);

        let err = publisher
            .publish_bytes(
                b"world",
                PublishOptions {
                    claimed_hash: Some(compute_hash(b"hello")),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::IntegrityMismatch { .. }));

        // The mismatch never reached the backend or the index
        assert_eq!(backend.add_count(), 1);
        assert!(index
            .get(&compute_hash(b"world"))
            .await
            .unwrap()
            .is_none());
        assert!(spool_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_no_payload() {
        let dir = TempDir::new().unwrap();
        let (publisher, backend, _) = test_publisher(&dir, 1024).await;

        let err = publisher
            .publish_bytes(b"", PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::NoPayload));
        assert_eq!(backend.add_count(), 0);
    }

    #[tokio::test]
    async fn test_size_limit() {
        let dir = TempDir::new().unwrap();
        let (publisher, backend, _) = test_publisher(&dir, 4).await;

        // Declared size fails before any buffering
        let err = publisher
            .publish_bytes(
                b"ab",
                PublishOptions {
                    size_hint: Some(100),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PayloadTooLarge { size: 100, max: 4 }));

        // Measured size fails too
        let err = publisher
            .publish_bytes(b"abcdef", PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::PayloadTooLarge { size: 6, max: 4 }));

        assert_eq!(backend.add_count(), 0);
        assert!(spool_is_empty(&dir));
    }

    #[tokio::test]
    async fn test_backend_failure_leaves_no_record() {
        struct FailingBackend;

        #[async_trait::async_trait]
        impl ContentBackend for FailingBackend {
            async fn add_object(
                &self,
                _data: Vec<u8>,
                _size_hint: u64,
                _mime_type: &str,
            ) -> Result<String, BackendError> {
                Err(BackendError::Timeout(30))
            }

            async fn resolve(&self, cid: &str) -> Result<Vec<u8>, BackendError> {
                Err(BackendError::NotFound(cid.to_string()))
            }

            async fn node_info(&self) -> Result<NodeInfo, BackendError> {
                Err(BackendError::Unavailable("down".to_string()))
            }
        }

        let dir = TempDir::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::initialize_schema(&pool).await.unwrap();

        let index = BlobIndex::new(pool);
        let publisher = Publisher::new(
            Arc::new(FailingBackend),
            index.clone(),
            dir.path().to_path_buf(),
            1024,
        );

        let err = publisher
            .publish_bytes(b"hello", PublishOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::BackendTimeout(30)));

        // No partial record, no leaked spool file
        assert_eq!(index.count().await.unwrap(), 0);
        assert!(spool_is_empty(&dir));
    }
}
