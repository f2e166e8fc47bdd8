//! Content fingerprints
//!
//! A fingerprint is the xxHash64 (seed 0) digest of a file's full content,
//! stored as 8 big-endian bytes. It doubles as the deduplication key and
//! as the correlation id echoed back by the server.

use crate::error::{UploadError, UploadResult};
use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Fingerprint width in bytes
pub const FINGERPRINT_LEN: usize = 8;

/// Fixed xxHash64 seed
pub const HASH_SEED: u64 = 0;

/// 8-byte content fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Fingerprint of `data`
    pub fn of(data: &[u8]) -> Self {
        Self(xxh64(data, HASH_SEED).to_be_bytes())
    }

    /// Compute the fingerprint off the async executor
    ///
    /// Takes ownership of the content and hands it back alongside the
    /// fingerprint so callers can send it without copying.
    pub async fn compute(content: Vec<u8>) -> UploadResult<(Self, Vec<u8>)> {
        let len = content.len();
        let (fingerprint, content) = tokio::task::spawn_blocking(move || {
            let fingerprint = Self::of(&content);
            (fingerprint, content)
        })
        .await
        .map_err(|e| UploadError::Task(format!("Fingerprint task failed: {}", e)))?;

        tracing::trace!(fingerprint = %fingerprint, bytes = len, "Computed fingerprint");
        Ok((fingerprint, content))
    }

    /// Build a fingerprint from a correlation id received over the wire
    ///
    /// Ids shorter than 8 bytes are zero-padded on the left; longer ids
    /// are rejected.
    pub fn from_wire(id: &[u8]) -> UploadResult<Self> {
        if id.len() > FINGERPRINT_LEN {
            return Err(UploadError::InvalidFingerprint(format!(
                "id is {} bytes, expected at most {}",
                id.len(),
                FINGERPRINT_LEN
            )));
        }
        let mut bytes = [0u8; FINGERPRINT_LEN];
        bytes[FINGERPRINT_LEN - id.len()..].copy_from_slice(id);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Fixed-width lowercase hex rendering
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl From<u64> for Fingerprint {
    fn from(value: u64) -> Self {
        Self(value.to_be_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}
