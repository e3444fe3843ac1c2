//! Chunk Tracker
//!
//! Accumulates out-of-order chunk submissions into assembled objects.
//! Chunks are spooled to per-index files so arrival order never matters;
//! the completing submission concatenates them in index order.
//!
//! Concurrency: the sessions map is shared, but every append-and-mark step
//! for one upload id runs under that session's own mutex. Submissions for
//! different upload ids proceed fully in parallel.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use crate::error::UploadError;
use crate::hash::compute_hash;

use super::types::{AssembledObject, ChunkMeta, ChunkResult};

// ============================================================================
// Upload Session
// ============================================================================

/// State of one in-flight chunked upload
#[derive(Debug)]
struct UploadSession {
    upload_id: String,
    expected_total: u32,
    received: HashSet<u32>,
    original_name: String,
    mime_type: String,
    claimed_hash: Option<String>,
    size_bytes: u64,
    started_at: Instant,
    dir: PathBuf,
}

impl UploadSession {
    fn new(upload_id: &str, total: u32, meta: ChunkMeta, dir: PathBuf) -> Self {
        Self {
            upload_id: upload_id.to_string(),
            expected_total: total,
            received: HashSet::new(),
            original_name: meta.name.unwrap_or_else(|| "unnamed".to_string()),
            mime_type: meta
                .mime
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            claimed_hash: meta.claimed_hash,
            size_bytes: 0,
            started_at: Instant::now(),
            dir,
        }
    }

    fn is_complete(&self) -> bool {
        self.received.len() as u32 == self.expected_total
    }

    fn age(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn chunk_path(&self, index: u32) -> PathBuf {
        self.dir.join(format!("{:08}.chunk", index))
    }
}

// ============================================================================
// Chunk Tracker
// ============================================================================

/// Tracks in-flight chunked uploads
#[derive(Clone)]
pub struct ChunkTracker {
    inner: Arc<ChunkTrackerInner>,
}

struct ChunkTrackerInner {
    spool_dir: PathBuf,
    max_object_size: u64,

    /// Live sessions; completed sessions are removed on handoff
    sessions: RwLock<HashMap<String, Arc<Mutex<UploadSession>>>>,
}

impl ChunkTracker {
    pub fn new(spool_dir: PathBuf, max_object_size: u64) -> Self {
        Self {
            inner: Arc::new(ChunkTrackerInner {
                spool_dir,
                max_object_size,
                sessions: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Submit one chunk for an upload
    ///
    /// Creates the session on the first chunk seen for `upload_id`, fixing
    /// `total` and the metadata at that point. Resubmitting an index already
    /// recorded discards the payload and reports `Duplicate`, which makes
    /// retries after client-side timeouts safe. The submission that fills
    /// the received set returns `Complete` exactly once and removes the
    /// session from the live set.
    pub async fn submit_chunk(
        &self,
        upload_id: &str,
        index: u32,
        total: u32,
        payload: &[u8],
        meta: ChunkMeta,
    ) -> Result<ChunkResult, UploadError> {
        if total < 1 || index >= total {
            return Err(UploadError::InvalidChunkParameters { index, total });
        }
        if payload.is_empty() {
            return Err(UploadError::NoPayload);
        }

        let cell = self.get_or_create_session(upload_id, total, meta).await;
        let mut session = cell.lock().await;

        // The total is fixed on the first chunk; a contradicting value means
        // the client is confused about the transfer
        if session.expected_total != total {
            return Err(UploadError::InvalidChunkParameters { index, total });
        }

        if session.received.contains(&index) {
            tracing::debug!(
                upload_id = %upload_id,
                chunk_index = index,
                "Duplicate chunk, discarding payload"
            );
            return Ok(ChunkResult::Duplicate {
                received: session.received.len() as u32,
                total: session.expected_total,
            });
        }

        let projected = session.size_bytes + payload.len() as u64;
        if projected > self.inner.max_object_size {
            self.remove_session_entry(upload_id, &cell).await;
            if let Err(e) = tokio::fs::remove_dir_all(&session.dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        upload_id = %upload_id,
                        error = %e,
                        "Failed to remove spool directory for oversized upload"
                    );
                }
            }
            return Err(UploadError::PayloadTooLarge {
                size: projected,
                max: self.inner.max_object_size,
            });
        }

        tokio::fs::create_dir_all(&session.dir)
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;
        tokio::fs::write(session.chunk_path(index), payload)
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;

        session.received.insert(index);
        session.size_bytes = projected;

        tracing::debug!(
            upload_id = %upload_id,
            chunk_index = index,
            chunks_received = session.received.len(),
            total_chunks = session.expected_total,
            "Chunk received"
        );

        if !session.is_complete() {
            return Ok(ChunkResult::InProgress {
                received: session.received.len() as u32,
                total: session.expected_total,
            });
        }

        // Completing submission: drop the session from the live set, then
        // assemble the chunks in index order and hand ownership to the caller
        self.remove_session_entry(upload_id, &cell).await;

        let assembled_path = self
            .inner
            .spool_dir
            .join(format!("assembled-{}.bin", Uuid::new_v4()));

        match assemble(&session, &assembled_path).await {
            Ok(size) => {
                let _ = tokio::fs::remove_dir_all(&session.dir).await;
                tracing::info!(
                    upload_id = %session.upload_id,
                    size_bytes = size,
                    chunks = session.expected_total,
                    name = %session.original_name,
                    "Upload assembled"
                );
                Ok(ChunkResult::Complete(AssembledObject {
                    path: assembled_path,
                    size_bytes: size,
                    original_name: session.original_name.clone(),
                    mime_type: session.mime_type.clone(),
                    claimed_hash: session.claimed_hash.clone(),
                }))
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&assembled_path).await;
                let _ = tokio::fs::remove_dir_all(&session.dir).await;
                Err(e)
            }
        }
    }

    /// Number of live (incomplete) sessions
    pub async fn live_sessions(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Remove incomplete sessions older than `max_age`
    ///
    /// Returns the number of sessions reaped. Safe to call concurrently with
    /// chunk submissions; a session that completes while the sweep runs is
    /// left alone.
    pub async fn reap_expired(&self, max_age: Duration) -> usize {
        let snapshot: Vec<(String, Arc<Mutex<UploadSession>>)> = {
            let sessions = self.inner.sessions.read().await;
            sessions
                .iter()
                .map(|(id, cell)| (id.clone(), cell.clone()))
                .collect()
        };

        let mut reaped = 0;
        for (upload_id, cell) in snapshot {
            let expired_dir = {
                let session = cell.lock().await;
                if session.age() >= max_age {
                    Some(session.dir.clone())
                } else {
                    None
                }
            };

            let Some(dir) = expired_dir else { continue };

            if !self.remove_session_entry(&upload_id, &cell).await {
                continue;
            }

            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        upload_id = %upload_id,
                        error = %e,
                        "Failed to remove spool directory for expired session"
                    );
                }
            }

            tracing::debug!(upload_id = %upload_id, "Reaped expired upload session");
            reaped += 1;
        }

        reaped
    }

    /// Start the background reaper task
    ///
    /// The returned handle cancels the loop; dropping it stops the task as
    /// well. Tests needing determinism call `reap_expired` directly instead.
    pub fn start_reaper(&self, interval: Duration, max_age: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let tracker = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = tracker.reap_expired(max_age).await;
                        if reaped > 0 {
                            tracing::info!(count = reaped, "Reaped expired upload sessions");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        ReaperHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }

    async fn get_or_create_session(
        &self,
        upload_id: &str,
        total: u32,
        meta: ChunkMeta,
    ) -> Arc<Mutex<UploadSession>> {
        {
            let sessions = self.inner.sessions.read().await;
            if let Some(cell) = sessions.get(upload_id) {
                return cell.clone();
            }
        }

        let mut sessions = self.inner.sessions.write().await;
        sessions
            .entry(upload_id.to_string())
            .or_insert_with(|| {
                let dir = self
                    .inner
                    .spool_dir
                    .join("sessions")
                    .join(session_dir_name(upload_id));
                tracing::info!(
                    upload_id = %upload_id,
                    total_chunks = total,
                    "Created upload session"
                );
                Arc::new(Mutex::new(UploadSession::new(upload_id, total, meta, dir)))
            })
            .clone()
    }

    /// Remove the map entry for `upload_id` if it still points at `cell`
    async fn remove_session_entry(
        &self,
        upload_id: &str,
        cell: &Arc<Mutex<UploadSession>>,
    ) -> bool {
        let mut sessions = self.inner.sessions.write().await;
        match sessions.get(upload_id) {
            Some(current) if Arc::ptr_eq(current, cell) => {
                sessions.remove(upload_id);
                true
            }
            _ => false,
        }
    }
}

/// Concatenate a session's chunk files in index order into `dest`
async fn assemble(session: &UploadSession, dest: &Path) -> Result<u64, UploadError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;
    }

    let mut out = tokio::fs::File::create(dest)
        .await
        .map_err(|e| UploadError::Storage(e.to_string()))?;

    let mut size: u64 = 0;
    for index in 0..session.expected_total {
        let chunk = tokio::fs::read(session.chunk_path(index))
            .await
            .map_err(|e| UploadError::Storage(format!("failed to read chunk {}: {}", index, e)))?;
        out.write_all(&chunk)
            .await
            .map_err(|e| UploadError::Storage(e.to_string()))?;
        size += chunk.len() as u64;
    }

    out.flush()
        .await
        .map_err(|e| UploadError::Storage(e.to_string()))?;

    Ok(size)
}

/// On-disk directory name for a session
///
/// Upload ids are opaque client strings, not safe path components; the
/// spool directory uses a digest of the id instead.
fn session_dir_name(upload_id: &str) -> String {
    compute_hash(upload_id.as_bytes())[..32].to_string()
}

// ============================================================================
// Reaper Handle
// ============================================================================

/// Cancellation handle for the background reaper task
pub struct ReaperHandle {
    shutdown: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for the task to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

// ============================================================================
// Tests
// ============================================================================
