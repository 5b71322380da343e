//! Version-control history sources.
//!
//! A history source supplies candidate commits for a keyword set, the
//! parsed commit for a hash and full file snapshots on either side of it.

mod git;
mod memory;

pub use git::GitHistory;
pub use memory::MemoryHistory;

use async_trait::async_trait;

use crate::code::PatchError;
use crate::domain::{Commit, Side};
use crate::error::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("not a git repository: {0}")]
    NotARepository(String),

    #[error("git {args} failed: {stderr}")]
    Git { args: String, stderr: String },

    #[error("malformed patch in {hash}: {source}")]
    Patch {
        hash: String,
        #[source]
        source: PatchError,
    },

    #[error("unparseable author date for {hash}: {value}")]
    Timestamp { hash: String, value: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HistoryResult<T> = std::result::Result<T, HistoryError>;

impl From<HistoryError> for PipelineError {
    fn from(err: HistoryError) -> Self {
        PipelineError::History(err.to_string())
    }
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Stable repository identifier used in record keys.
    fn repo_id(&self) -> &str;

    /// Hashes of commits whose message contains any keyword
    /// (case-insensitive), newest first, without duplicates.
    async fn candidates(&self, keywords: &[String]) -> HistoryResult<Vec<String>>;

    /// The parsed commit, or `None` if the hash is unknown.
    async fn commit(&self, hash: &str) -> HistoryResult<Option<Commit>>;

    /// Full contents of `path` at the parent (`Before`) or at the commit
    /// (`After`); `None` if the file does not exist on that side.
    async fn snapshot(&self, hash: &str, path: &str, side: Side) -> HistoryResult<Option<String>>;
}
