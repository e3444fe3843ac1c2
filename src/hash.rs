//! Content hashing
//!
//! SHA-256 digests over object bytes, used both to verify client-claimed
//! hashes and to derive the deduplication key for the blob index. All
//! digests are lowercase hex, 64 characters.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::UploadError;

/// Length of a hex-encoded SHA-256 digest
pub const DIGEST_HEX_LEN: usize = 64;

/// Read buffer size for streaming file digests
const HASH_READ_BUF: usize = 64 * 1024;

/// Incremental SHA-256 hasher
///
/// The digest is independent of how the input is split across `update`
/// calls, so callers can feed whatever read sizes they have.
pub struct ContentHasher(Sha256);

impl ContentHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize_hex(self) -> String {
        hex::encode(self.0.finalize())
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute SHA-256 hash of in-memory data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute SHA-256 hash of a file, streaming in fixed-size reads
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = ContentHasher::new();
    let mut buf = vec![0u8; HASH_READ_BUF];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hasher.finalize_hex())
}

/// Verify a computed digest against a caller-claimed digest
///
/// Comparison is case-insensitive; the failure carries both values so the
/// caller can decide whether to retry or abandon.
pub fn verify_hash(claimed: &str, computed: &str) -> Result<(), UploadError> {
    if claimed.eq_ignore_ascii_case(computed) {
        Ok(())
    } else {
        Err(UploadError::IntegrityMismatch {
            claimed: claimed.to_ascii_lowercase(),
            computed: computed.to_string(),
        })
    }
}

/// Check that a string looks like a hex-encoded SHA-256 digest
pub fn is_valid_digest(s: &str) -> bool {
    s.len() == DIGEST_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit())
}
