//! Storage trait definitions for fixcorpus
//!
//! - `BlobStore`: durable bytes keyed by a flat name (one key per stage
//!   output or cursor), replace-on-write.
//! - `ContentDigest`: SHA-256 of a stored blob, used to detect that an
//!   upstream stage output changed underneath a downstream cursor.
//!
//! All traits are async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// BlobStore
// ---------------------------------------------------------------------------

/// Validate a blob key.
///
/// Keys are flat names: ASCII alphanumerics plus `_`, `-` and `.`, not
/// starting with `.`. This keeps every backend free of path traversal.
pub fn validate_key(key: &str) -> StorageResult<()> {
    let valid = !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey {
            key: key.to_string(),
        })
    }
}

/// Guard returned by [`BlobStore::lock`]; releases the lock on drop.
pub struct ProducerLock {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ProducerLock {
    pub fn new(release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for ProducerLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ProducerLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProducerLock")
            .field("held", &self.release.is_some())
            .finish()
    }
}

/// Durable blob store keyed by stage name.
///
/// Guarantees:
/// - `put(key, data)` replaces any previous blob under `key` atomically:
///   a reader sees either the old or the new bytes, never a mix.
/// - `put` returns the SHA-256 digest of `data`.
/// - `get(key)` returns the exact bytes last stored.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under `key`, replacing any previous blob.
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<ContentDigest>;

    /// Retrieve bytes by key. Returns `StorageError::NotFound` if absent.
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>>;

    /// Check whether a key exists.
    async fn contains(&self, key: &str) -> StorageResult<bool>;

    /// Delete a blob. No-op if absent.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// All keys currently stored, sorted.
    async fn keys(&self) -> StorageResult<Vec<String>>;

    /// Take the single-producer lock for `name`.
    ///
    /// Returns `StorageError::Locked` if another producer holds it.
    fn lock(&self, name: &str) -> StorageResult<ProducerLock>;
}

/// Load and deserialize a JSON blob; `Ok(None)` if the key is absent.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn BlobStore,
    key: &str,
) -> StorageResult<Option<T>> {
    match store.get(key).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(StorageError::NotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Serialize a value as pretty JSON and store it under `key`.
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
) -> StorageResult<ContentDigest> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.put(key, &bytes).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_deterministic() {
        let a = ContentDigest::from_bytes(b"test data");
        let b = ContentDigest::from_bytes(b"test data");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn digest_try_from_rejects_bad_input() {
        assert!(ContentDigest::try_from("abcd".to_string()).is_err());
        assert!(ContentDigest::try_from("z".repeat(64)).is_err());
        let ok = ContentDigest::try_from("AB".repeat(32)).unwrap();
        assert_eq!(ok.as_str(), "ab".repeat(32));
    }

    #[test]
    fn key_validation() {
        assert!(validate_key("s1_refine.json").is_ok());
        assert!(validate_key("s1_refine.cursor.json").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("a/b").is_err());
        assert!(validate_key(".hidden").is_err());
    }

    #[test]
    fn producer_lock_runs_release_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let lock = ProducerLock::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(lock);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
