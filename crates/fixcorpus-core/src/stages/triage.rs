//! S0b: deterministic secondary filters, then oracle classification.

use std::sync::Arc;

use async_trait::async_trait;
use fixcorpus_oracle::Oracle;

use super::{RecordOutcome, Rejection, Stage, StageProcessor};
use crate::code::count_tokens;
use crate::config::RetrievalConfig;
use crate::domain::{Commit, TriagedCommit};
use crate::prompts;
use crate::response::parse_verdict;

pub struct TriageProcessor {
    oracle: Arc<dyn Oracle>,
    config: RetrievalConfig,
}

impl TriageProcessor {
    pub fn new(oracle: Arc<dyn Oracle>, config: RetrievalConfig) -> Self {
        Self { oracle, config }
    }

    /// Filters that need no oracle call.
    pub fn screen(&self, commit: &Commit) -> Option<Rejection> {
        let tokens = count_tokens(&commit.patch);
        if tokens > self.config.max_diff_tokens {
            return Some(Rejection::DiffTooManyTokens { tokens });
        }
        if self.config.single_file && commit.files.len() != 1 {
            return Some(Rejection::MultipleFiles {
                count: commit.files.len(),
            });
        }
        commit
            .files
            .iter()
            .find(|f| {
                let ext = f.language.extension().to_ascii_lowercase();
                !self.config.extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
            })
            .map(|f| Rejection::NotSystemsLanguage {
                path: f.path.clone(),
            })
    }
}

#[async_trait]
impl StageProcessor for TriageProcessor {
    type Input = Commit;
    type Output = TriagedCommit;

    fn stage(&self) -> Stage {
        Stage::Triage
    }

    async fn process(&self, _key: &str, commit: Commit) -> RecordOutcome<TriagedCommit> {
        if let Some(rejection) = self.screen(&commit) {
            return RecordOutcome::Rejected(rejection);
        }
        let response = match self.oracle.classify(prompts::classify(&commit)).await {
            Ok(text) => text,
            Err(err) => return RecordOutcome::failed(&err),
        };
        RecordOutcome::Kept(TriagedCommit {
            verdict: parse_verdict(&response),
            commit,
            oracle_response: response,
        })
    }
}
