//! fixcorpus-store: stage persistence for the fixcorpus pipeline
//!
//! ## Layer 0 - Data/Persistence
//!
//! Every stage writes one serialized record collection and one cursor,
//! each under a flat key. Writes replace whole blobs atomically; there is
//! exactly one producer per stage output at a time.
//!
//! ## Key Components
//!
//! - `BlobStore`: async key -> bytes store (filesystem and in-memory)
//! - `StageCursor`: committed index ranges, for resumable sharded runs
//! - `ContentDigest`: SHA-256 used to detect upstream changes

mod error;
pub mod cursor;
pub mod fakes;
pub mod fs;
pub mod storage_traits;

pub use cursor::{IndexRange, StageCursor};
pub use error::StorageError;
pub use fs::FsBlobStore;
pub use storage_traits::{
    load_json, save_json, validate_key, BlobStore, ContentDigest, ProducerLock, StorageResult,
};
