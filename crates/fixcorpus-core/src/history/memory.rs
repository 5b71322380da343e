use std::collections::HashMap;

use async_trait::async_trait;

use super::{HistoryResult, HistorySource};
use crate::domain::{Commit, Side};

/// In-memory history for tests and fixtures.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistory {
    repo: String,
    commits: Vec<Commit>,
    files: HashMap<(String, String, Side), String>,
}

impl MemoryHistory {
    pub fn new(repo: &str) -> Self {
        Self {
            repo: repo.to_string(),
            ..Self::default()
        }
    }

    /// Add a commit; commits are reported newest first in insertion order.
    pub fn with_commit(mut self, commit: Commit) -> Self {
        self.commits.push(commit);
        self
    }

    /// Register the contents of `path` around `hash`.
    pub fn with_file(
        mut self,
        hash: &str,
        path: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Self {
        for (side, text) in [(Side::Before, before), (Side::After, after)] {
            if let Some(text) = text {
                self.files
                    .insert((hash.to_string(), path.to_string(), side), text.to_string());
            }
        }
        self
    }
}

#[async_trait]
impl HistorySource for MemoryHistory {
    fn repo_id(&self) -> &str {
        &self.repo
    }

    async fn candidates(&self, keywords: &[String]) -> HistoryResult<Vec<String>> {
        let mut out: Vec<String> = Vec::new();
        for commit in &self.commits {
            if commit.matches_any(keywords) && !out.contains(&commit.hash) {
                out.push(commit.hash.clone());
            }
        }
        Ok(out)
    }

    async fn commit(&self, hash: &str) -> HistoryResult<Option<Commit>> {
        Ok(self.commits.iter().find(|c| c.hash == hash).cloned())
    }

    async fn snapshot(&self, hash: &str, path: &str, side: Side) -> HistoryResult<Option<String>> {
        Ok(self
            .files
            .get(&(hash.to_string(), path.to_string(), side))
            .cloned())
    }
}
