//! Content-addressable storage backend
//!
//! The backend is treated as a black box: bytes go in, a content identifier
//! comes out, and a content identifier resolves back to bytes. The concrete
//! implementation speaks the IPFS node HTTP RPC API.

mod ipfs;

pub use ipfs::IpfsClient;

use serde::Serialize;
use thiserror::Error;

/// Backend failure modes
///
/// `Unavailable` and `Timeout` are transient and safe to retry at the caller
/// level; `NotFound` is permanent for the given identifier.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend request timed out after {0}s")]
    Timeout(u64),

    #[error("object not found in backend: {0}")]
    NotFound(String),
}

/// Identity and repository statistics for the backend node
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    pub peer_id: String,
    pub version: String,
    pub addresses: Vec<String>,
    pub repo_objects: u64,
    pub repo_size: u64,
}

/// Trait for content-addressable storage backends
#[async_trait::async_trait]
pub trait ContentBackend: Send + Sync {
    /// Publish an object to the backend, returning its content identifier
    async fn add_object(
        &self,
        data: Vec<u8>,
        size_hint: u64,
        mime_type: &str,
    ) -> Result<String, BackendError>;

    /// Resolve a content identifier back to the object bytes
    async fn resolve(&self, cid: &str) -> Result<Vec<u8>, BackendError>;

    /// Fetch identity and repository statistics from the node
    async fn node_info(&self) -> Result<NodeInfo, BackendError>;
}
