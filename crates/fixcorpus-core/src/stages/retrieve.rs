//! S0a: keyword retrieval from a history source.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::domain::Commit;
use crate::error::PipelineResult;
use crate::history::{HistoryError, HistorySource};

/// Counts of what retrieval saw and dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalSummary {
    pub candidates: usize,
    pub kept: usize,
    pub unknown: usize,
    pub unmatched: usize,
    pub malformed: usize,
    pub without_hunks: usize,
    pub too_large: usize,
}

/// Collect keyword-matching commits with a parseable, bounded diff.
///
/// Output is keyed by the canonical record key, so duplicates collapse.
pub async fn retrieve(
    history: &dyn HistorySource,
    config: &RetrievalConfig,
) -> PipelineResult<(BTreeMap<String, Commit>, RetrievalSummary)> {
    let hashes = history.candidates(&config.keywords).await?;
    let mut summary = RetrievalSummary {
        candidates: hashes.len(),
        ..RetrievalSummary::default()
    };
    let mut out = BTreeMap::new();

    for hash in &hashes {
        let commit = match history.commit(hash).await {
            Ok(Some(commit)) => commit,
            Ok(None) => {
                summary.unknown += 1;
                continue;
            }
            Err(err @ (HistoryError::Patch { .. } | HistoryError::Timestamp { .. })) => {
                tracing::warn!(event = "record.invalid", stage = "s0_retrieve", commit = %hash, error = %err);
                summary.malformed += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        if !commit.matches_any(&config.keywords) {
            summary.unmatched += 1;
            continue;
        }
        if commit.patch.trim().is_empty() || commit.files.iter().all(|f| f.hunks.is_empty()) {
            tracing::debug!(commit = %hash, "dropping merge or empty commit");
            summary.without_hunks += 1;
            continue;
        }
        let chars = commit.render().chars().count();
        if chars > config.max_diff_chars {
            tracing::debug!(commit = %hash, chars, "dropping oversized diff");
            summary.too_large += 1;
            continue;
        }
        out.insert(commit.key().to_string(), commit);
    }

    summary.kept = out.len();
    Ok((out, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::MemoryHistory;
    use chrono::DateTime;

    fn commit(hash: &str, message: &str, patch: &str) -> Commit {
        let ts = DateTime::parse_from_rfc3339("2020-05-01T12:00:00Z").unwrap();
        Commit::from_patch("demo", hash, message, ts, patch).unwrap()
    }

    const PATCH: &str = "--- a/a.c\n+++ b/a.c\n@@ -1,2 +1,2 @@\n int x;\n-int y;\n+int z;\n";

    #[tokio::test]
    async fn keeps_matching_bounded_commits() {
        let history = MemoryHistory::new("demo")
            .with_commit(commit("aaa", "Fix overflow in parser", PATCH))
            .with_commit(commit("bbb", "Update README", PATCH))
            .with_commit(commit("ccc", "Merge branch 'fix'", ""))
            .with_commit(commit("ddd", "fix huge table", PATCH));

        let config = RetrievalConfig {
            max_diff_chars: 10_000,
            ..RetrievalConfig::default()
        };
        let (out, summary) = retrieve(&history, &config).await.unwrap();
        let keys: Vec<&str> = out.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["demo@aaa", "demo@ddd"]);
        assert_eq!(summary.candidates, 3);
        assert_eq!(summary.without_hunks, 1);

        let tight = RetrievalConfig {
            max_diff_chars: 20,
            ..RetrievalConfig::default()
        };
        let (out, summary) = retrieve(&history, &tight).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(summary.too_large, 2);
    }
}
