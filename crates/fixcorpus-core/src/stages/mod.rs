//! Stage processors S0b–S4.
//!
//! Each processor maps one input record to a [`RecordOutcome`]. Processors
//! never touch storage; the [`crate::runner`] owns ranges, batching and
//! persistence. S0a retrieval reads a history source instead of a
//! predecessor and lives in [`retrieve`].

pub mod assemble;
pub mod explain;
pub mod mask;
pub mod refine;
pub mod resolve;
pub mod retrieve;
pub mod triage;

pub use assemble::AssembleProcessor;
pub use explain::ExplainProcessor;
pub use mask::MaskProcessor;
pub use refine::RefineProcessor;
pub use resolve::ResolveProcessor;
pub use retrieve::retrieve;
pub use triage::TriageProcessor;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use fixcorpus_oracle::OracleError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::SecurityVerdict;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieve,
    Triage,
    Refine,
    Mask,
    Resolve,
    Explain,
    Assemble,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Retrieve,
        Stage::Triage,
        Stage::Refine,
        Stage::Mask,
        Stage::Resolve,
        Stage::Explain,
        Stage::Assemble,
    ];

    /// Stage-store key prefix.
    pub fn key(&self) -> &'static str {
        match self {
            Stage::Retrieve => "s0_retrieve",
            Stage::Triage => "s0_triage",
            Stage::Refine => "s1_refine",
            Stage::Mask => "s2_mask",
            Stage::Resolve => "s2_resolve",
            Stage::Explain => "s3_explain",
            Stage::Assemble => "s4_assemble",
        }
    }

    pub fn output_key(&self) -> String {
        format!("{}.json", self.key())
    }

    pub fn cursor_key(&self) -> String {
        format!("{}.cursor.json", self.key())
    }

    pub fn predecessor(&self) -> Option<Stage> {
        match self {
            Stage::Retrieve => None,
            Stage::Triage => Some(Stage::Retrieve),
            Stage::Refine => Some(Stage::Triage),
            Stage::Mask => Some(Stage::Refine),
            Stage::Resolve => Some(Stage::Mask),
            Stage::Explain => Some(Stage::Resolve),
            Stage::Assemble => Some(Stage::Explain),
        }
    }

    pub fn uses_oracle(&self) -> bool {
        matches!(
            self,
            Stage::Triage | Stage::Mask | Stage::Resolve | Stage::Explain
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| {
                stage.key() == s || format!("{stage:?}").eq_ignore_ascii_case(s)
            })
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

/// Why a deterministic filter dropped a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Verdict(SecurityVerdict),
    MultipleFiles { count: usize },
    NotSystemsLanguage { path: String },
    DiffTooLarge { chars: usize },
    DiffTooManyTokens { tokens: usize },
    NoDeletions,
    AfterCutoff,
    SnapshotUnavailable { side: &'static str },
    FunctionUnresolved,
    MultipleFunctions { names: Vec<String> },
    NoOp,
    FormattingOnly,
    FunctionTooLong { tokens: usize },
    PlaceholderPresent,
    MissingUpstream { field: &'static str },
    NoUndefinedElements,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Verdict(v) => write!(f, "verdict {v}"),
            Rejection::MultipleFiles { count } => write!(f, "touches {count} files"),
            Rejection::NotSystemsLanguage { path } => write!(f, "not a systems-language file: {path}"),
            Rejection::DiffTooLarge { chars } => write!(f, "diff has {chars} characters"),
            Rejection::DiffTooManyTokens { tokens } => write!(f, "diff has {tokens} tokens"),
            Rejection::NoDeletions => f.write_str("no deleted lines"),
            Rejection::AfterCutoff => f.write_str("committed after cutoff"),
            Rejection::SnapshotUnavailable { side } => write!(f, "{side} snapshot unavailable"),
            Rejection::FunctionUnresolved => f.write_str("hunk outside any function"),
            Rejection::MultipleFunctions { names } => {
                write!(f, "changes span functions {}", names.join(", "))
            }
            Rejection::NoOp => f.write_str("no-op after whitespace normalization"),
            Rejection::FormattingOnly => f.write_str("formatting-only change"),
            Rejection::FunctionTooLong { tokens } => write!(f, "function has {tokens} tokens"),
            Rejection::PlaceholderPresent => f.write_str("body already contains a placeholder"),
            Rejection::MissingUpstream { field } => write!(f, "missing upstream field {field}"),
            Rejection::NoUndefinedElements => f.write_str("no undefined element around the mask"),
        }
    }
}

/// Result of processing one record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome<T> {
    /// Record survives into the stage output
    Kept(T),
    /// Dropped by a deterministic filter
    Rejected(Rejection),
    /// Oracle answered but the answer failed format or semantic validation
    Invalid { reason: String, raw: String },
    /// Oracle unavailable after retries; the record is retried on a later run
    Failed(String),
}

impl<T> RecordOutcome<T> {
    pub fn invalid(reason: impl fmt::Display, raw: impl Into<String>) -> Self {
        RecordOutcome::Invalid {
            reason: reason.to_string(),
            raw: raw.into(),
        }
    }

    pub fn failed(err: &OracleError) -> Self {
        RecordOutcome::Failed(err.to_string())
    }

    pub fn is_kept(&self) -> bool {
        matches!(self, RecordOutcome::Kept(_))
    }

    pub fn kept(self) -> Option<T> {
        match self {
            RecordOutcome::Kept(v) => Some(v),
            _ => None,
        }
    }
}

/// A stage that maps each predecessor record to an outcome.
#[async_trait]
pub trait StageProcessor: Send + Sync + 'static {
    type Input: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    fn stage(&self) -> Stage;

    async fn process(&self, key: &str, input: Self::Input) -> RecordOutcome<Self::Output>;
}

/// A resolved `strcpy` fix shared by the S2-S4 processor tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::DateTime;

    use crate::domain::{
        Commit, FileSnapshot, FunctionPair, LineRange, MaskedFunction, MaskedRecord, RecordKey,
        RefinedCommit, ResolvedRecord, SecurityVerdict, TriagedCommit,
    };

    pub const BEFORE: &str = "int f(char *s)\n{\n    strcpy(buf, s);\n}";
    pub const AFTER: &str = "int f(char *s)\n{\n    strlcpy(buf, s, sizeof(buf));\n}";
    const PATCH: &str = "diff --git a/f.c b/f.c
--- a/f.c
+++ b/f.c
@@ -3,1 +3,1 @@ int f(char *s)
-    strcpy(buf, s);
+    strlcpy(buf, s, sizeof(buf));
";

    /// Masked on `strcpy(buf, s);` with no undefined elements.
    pub fn resolved() -> ResolvedRecord {
        let ts = DateTime::parse_from_rfc3339("2021-07-04T10:00:00+02:00").unwrap();
        let commit = Commit::from_patch("demo", "c1", "fix overflow", ts, PATCH).unwrap();
        let start = BEFORE.find("strcpy").unwrap();
        let span = crate::code::span_at(BEFORE, start, start + "strcpy(buf, s);".len());
        let masked = MaskedFunction::apply(BEFORE, span, "MASK", 1).unwrap();
        let pair = FunctionPair {
            name: "f".into(),
            signature: "int f(char *s)".into(),
            before_body: BEFORE.into(),
            after_body: AFTER.into(),
            before_lines: LineRange { start: 1, end: 4 },
            after_lines: LineRange { start: 1, end: 4 },
            commit: RecordKey::new("demo", "c1"),
        };
        ResolvedRecord {
            masked: MaskedRecord {
                refined: RefinedCommit {
                    triaged: TriagedCommit {
                        commit,
                        verdict: SecurityVerdict::ConfirmedFix,
                        oracle_response: "yes".into(),
                    },
                    snapshot: FileSnapshot {
                        path: "f.c".into(),
                        before: BEFORE.into(),
                        after: AFTER.into(),
                    },
                    pair,
                },
                masked,
                oracle_response: "strcpy(buf, s);".into(),
            },
            elements: Vec::new(),
            extract_response: "None".into(),
            resolve_response: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_chain_is_linear() {
        let mut prev = None;
        for stage in Stage::ALL {
            assert_eq!(stage.predecessor(), prev);
            prev = Some(stage);
        }
        assert_eq!(Stage::Mask.output_key(), "s2_mask.json");
        assert_eq!(Stage::Mask.cursor_key(), "s2_mask.cursor.json");
    }

    #[test]
    fn stage_parsing() {
        assert_eq!("s3_explain".parse::<Stage>().unwrap(), Stage::Explain);
        assert_eq!("triage".parse::<Stage>().unwrap(), Stage::Triage);
        assert!("s9".parse::<Stage>().is_err());
    }

    #[test]
    fn outcome_helpers() {
        let kept: RecordOutcome<u8> = RecordOutcome::Kept(3);
        assert!(kept.is_kept());
        assert_eq!(kept.kept(), Some(3));
        let failed: RecordOutcome<u8> = RecordOutcome::failed(&OracleError::Timeout { elapsed_ms: 5 });
        assert!(matches!(failed, RecordOutcome::Failed(_)));
        assert_eq!(
            Rejection::MultipleFiles { count: 2 }.to_string(),
            "touches 2 files"
        );
    }
}
