//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryBlobStore`, which satisfies the `BlobStore` contract
//! without touching the filesystem.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::storage_traits::*;

/// In-memory blob store backed by a `BTreeMap<key, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    store: Mutex<BTreeMap<String, Vec<u8>>>,
    locks: Arc<Mutex<HashSet<String>>>,
    puts: Mutex<u64>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `put` calls, for asserting write behaviour.
    pub fn put_count(&self) -> u64 {
        *self.puts.lock().unwrap()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<ContentDigest> {
        validate_key(key)?;
        let digest = ContentDigest::from_bytes(data);
        self.store
            .lock()
            .unwrap()
            .insert(key.to_string(), data.to_vec());
        *self.puts.lock().unwrap() += 1;
        Ok(digest)
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        validate_key(key)?;
        let store = self.store.lock().unwrap();
        store
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                key: key.to_string(),
            })
    }

    async fn contains(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        Ok(self.store.lock().unwrap().contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        self.store.lock().unwrap().remove(key);
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.store.lock().unwrap().keys().cloned().collect())
    }

    fn lock(&self, name: &str) -> StorageResult<ProducerLock> {
        validate_key(name)?;
        let mut held = self.locks.lock().unwrap();
        if !held.insert(name.to_string()) {
            return Err(StorageError::Locked {
                name: name.to_string(),
            });
        }
        let locks = Arc::clone(&self.locks);
        let name = name.to_string();
        Ok(ProducerLock::new(move || {
            if let Ok(mut held) = locks.lock() {
                held.remove(&name);
            }
        }))
    }
}
