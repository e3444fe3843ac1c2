//! Upload types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A published blob, keyed by its content hash
///
/// At most one record exists per content hash. Records are created on first
/// successful backend publish and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRecord {
    /// SHA-256 content hash, lowercase hex
    pub content_hash: String,

    /// Content identifier assigned by the storage backend
    pub cid: String,

    /// Object size in bytes
    pub size_bytes: u64,

    /// MIME type declared at upload time
    pub mime_type: String,

    /// Informational display name
    pub display_name: String,

    /// When the object was first published
    pub uploaded_at: DateTime<Utc>,
}

/// Metadata accompanying a chunk submission
///
/// Only the values seen on the first chunk of a session are recorded; later
/// submissions may omit them.
#[derive(Debug, Clone, Default)]
pub struct ChunkMeta {
    pub name: Option<String>,
    pub mime: Option<String>,
    pub claimed_hash: Option<String>,
}

/// Outcome of a single chunk submission
#[derive(Debug)]
pub enum ChunkResult {
    /// This (uploadId, chunkIndex) pair was already recorded; the payload
    /// was discarded and session state is unchanged
    Duplicate { received: u32, total: u32 },

    /// Chunk recorded, more chunks outstanding
    InProgress { received: u32, total: u32 },

    /// This submission completed the session; ownership of the assembled
    /// object transfers to the caller
    Complete(AssembledObject),
}

/// A fully assembled object spooled to disk
///
/// Handed from the chunk tracker to the publisher, which deletes the spool
/// file before returning on every path.
#[derive(Debug)]
pub struct AssembledObject {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub original_name: String,
    pub mime_type: String,
    pub claimed_hash: Option<String>,
}
