//! Error types for fixcorpus-store

use thiserror::Error;

/// Errors that can occur in the stage persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// No blob stored under this key
    #[error("blob not found: {key}")]
    NotFound { key: String },

    /// Key contains characters that cannot be mapped onto a backend
    #[error("invalid blob key: {key:?}")]
    InvalidKey { key: String },

    /// Digest string is not 64 hex characters
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Another producer holds the lock for this stage output
    #[error("stage output {name} is locked by another producer")]
    Locked { name: String },

    /// Stored bytes could not be (de)serialized
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Backend I/O failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, err))
    }
}
