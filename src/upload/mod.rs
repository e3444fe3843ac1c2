//! Chunked Upload Module
//!
//! Implements reliable large object uploads with:
//! - SHA-256 content hashing for integrity checks and deduplication
//! - Out-of-order chunk accumulation with per-session serialization
//! - At-most-one backend publish per content hash
//!
//! Flow:
//! 1. Client submits chunks for an upload id in any order
//! 2. Tracker spools chunks and detects the completing submission
//! 3. Publisher verifies the assembled object and publishes it to the
//!    backend, recording the hash-to-CID mapping in the blob index

pub mod index;
pub mod publisher;
pub mod tracker;
pub mod types;

pub use index::BlobIndex;
pub use publisher::{PublishOptions, PublishOutcome, Publisher};
pub use tracker::{ChunkTracker, ReaperHandle};
pub use types::*;
