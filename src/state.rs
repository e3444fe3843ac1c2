//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::storage::ContentBackend;
use crate::upload::{BlobIndex, ChunkTracker, Publisher};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    backend: Arc<dyn ContentBackend>,
    index: BlobIndex,
    tracker: ChunkTracker,
    publisher: Publisher,
}

impl AppState {
    /// Create a new application state
    ///
    /// Wires the tracker, index, and publisher around the given backend;
    /// tests pass a mock backend and an in-memory database pool.
    pub fn new(config: Config, backend: Arc<dyn ContentBackend>, db: SqlitePool) -> Self {
        let index = BlobIndex::new(db);
        let tracker = ChunkTracker::new(
            config.upload.spool_dir.clone(),
            config.upload.max_object_size,
        );
        let publisher = Publisher::new(
            backend.clone(),
            index.clone(),
            config.upload.spool_dir.clone(),
            config.upload.max_object_size,
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                backend,
                index,
                tracker,
                publisher,
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn backend(&self) -> &Arc<dyn ContentBackend> {
        &self.inner.backend
    }

    pub fn index(&self) -> &BlobIndex {
        &self.inner.index
    }

    pub fn tracker(&self) -> &ChunkTracker {
        &self.inner.tracker
    }

    pub fn publisher(&self) -> &Publisher {
        &self.inner.publisher
    }
}
