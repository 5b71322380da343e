//! Pipeline-level error taxonomy.
//!
//! Only conditions that abort a whole stage run are errors. Per-record
//! outcomes (rejected, invalid, failed) are values; see
//! [`crate::stages::RecordOutcome`].

use fixcorpus_oracle::OracleError;
use fixcorpus_store::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("invalid index range [{start}, {end}) for {len} input records")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("stage {stage} cannot run: {predecessor} has covered {covered} of {len} records")]
    PredecessorIncomplete {
        stage: String,
        predecessor: String,
        covered: usize,
        len: usize,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("history source error: {0}")]
    History(String),

    #[error("worker task failed: {0}")]
    Worker(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("oracle setup error: {0}")]
    Oracle(#[from] OracleError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
