use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::storage_traits::{validate_key, BlobStore, ContentDigest, ProducerLock, StorageResult};

/// Filesystem-backed blob store.
///
/// Layout: `<root>/<key>` for blobs, `<root>/locks/<name>.lock` for producer locks.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Create a new `FsBlobStore` rooted at `root`. Creates the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("locks"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn write_atomic(dir: &Path, path: &Path, data: &[u8]) -> StorageResult<()> {
    // Write to a temp file in the same directory, then rename over the target.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, data: &[u8]) -> StorageResult<ContentDigest> {
        let path = self.blob_path(key)?;
        let digest = ContentDigest::from_bytes(data);
        let dir = self.root.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &data)).await??;
        Ok(digest)
    }

    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.blob_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::Io(e)
            }
        })
    }

    async fn contains(&self, key: &str) -> StorageResult<bool> {
        let path = self.blob_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.blob_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_key(name).is_ok() {
                    keys.push(name.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Take the producer lock for `name`.
    ///
    /// The lock file records the owner's pid. A lock whose owner process no
    /// longer exists (killed or crashed) is taken over.
    fn lock(&self, name: &str) -> StorageResult<ProducerLock> {
        validate_key(name)?;
        let dir = self.root.join("locks");
        let path = dir.join(format!("{name}.lock"));

        let mut acquired = create_lock(&dir, &path)?;
        if !acquired {
            if let Some(pid) = lock_owner(&path).filter(|pid| !process_alive(*pid)) {
                tracing::warn!(lock = %name, stale_pid = pid, "taking over lock of exited producer");
                if lock_owner(&path) == Some(pid) {
                    let _ = fs::remove_file(&path);
                }
                acquired = create_lock(&dir, &path)?;
            }
        }
        if !acquired {
            return Err(StorageError::Locked {
                name: name.to_string(),
            });
        }
        Ok(ProducerLock::new(move || {
            let _ = fs::remove_file(&path);
        }))
    }
}

/// Atomically create `path` holding our pid; `false` if it already exists.
fn create_lock(dir: &Path, path: &Path) -> StorageResult<bool> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    writeln!(tmp, "{}", std::process::id())?;
    tmp.as_file().sync_all()?;
    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error.into()),
    }
}

fn lock_owner(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return true;
    };
    // Safety: signal 0 only checks that the process exists.
    let ret = unsafe { libc::kill(pid, 0) };
    ret == 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
