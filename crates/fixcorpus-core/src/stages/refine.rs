//! S1: resolve the fix to a single before/after function pair.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::{RecordOutcome, Rejection, Stage, StageProcessor};
use crate::code::{
    count_tokens, enclosing_function, find_function, function_extents, normalize_whitespace,
    same_token_stream, FunctionExtent,
};
use crate::config::RefineConfig;
use crate::domain::{
    FileDiff, FileSnapshot, FunctionPair, LineRange, RefinedCommit, SecurityVerdict, Side,
    TriagedCommit,
};
use crate::history::HistorySource;

pub struct RefineProcessor {
    history: Arc<dyn HistorySource>,
    config: RefineConfig,
}

/// The single function touched on one side, or why there is none.
fn touched_function<'a>(
    extents: &'a [FunctionExtent],
    lines: &[u32],
) -> Result<&'a FunctionExtent, Rejection> {
    let mut hit: Vec<&FunctionExtent> = Vec::new();
    for &line in lines {
        let extent = enclosing_function(extents, line).ok_or(Rejection::FunctionUnresolved)?;
        if !hit.iter().any(|e| e.start == extent.start) {
            hit.push(extent);
        }
    }
    match hit.as_slice() {
        [] => Err(Rejection::FunctionUnresolved),
        [one] => Ok(one),
        many => Err(Rejection::MultipleFunctions {
            names: many
                .iter()
                .map(|e| e.name.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }),
    }
}

/// Pair the before and after extents touched by every hunk of `file`.
fn pair_extents<'a>(
    file: &FileDiff,
    before: &'a [FunctionExtent],
    after: &'a [FunctionExtent],
) -> Result<(&'a FunctionExtent, &'a FunctionExtent), Rejection> {
    let mut old_lines = Vec::new();
    let mut new_lines = Vec::new();
    for hunk in &file.hunks {
        let (old, new) = hunk.touched_lines();
        old_lines.extend(old);
        new_lines.extend(new);
    }

    let old_fn = touched_function(before, &old_lines)?;
    let new_fn = match touched_function(after, &new_lines) {
        Ok(extent) => extent,
        // A deletion at the end of a body can anchor past the closing brace.
        Err(Rejection::FunctionUnresolved) => {
            find_function(after, &old_fn.name).ok_or(Rejection::FunctionUnresolved)?
        }
        Err(other) => return Err(other),
    };
    if old_fn.name != new_fn.name {
        return Err(Rejection::MultipleFunctions {
            names: vec![old_fn.name.clone(), new_fn.name.clone()],
        });
    }
    Ok((old_fn, new_fn))
}

impl RefineProcessor {
    pub fn new(history: Arc<dyn HistorySource>, config: RefineConfig) -> Self {
        Self { history, config }
    }

    /// Filters on the commit alone, in rejection order.
    fn screen(&self, triaged: &TriagedCommit) -> Option<Rejection> {
        let commit = &triaged.commit;
        if triaged.verdict != SecurityVerdict::ConfirmedFix {
            return Some(Rejection::Verdict(triaged.verdict));
        }
        if commit.files.len() != 1 {
            return Some(Rejection::MultipleFiles {
                count: commit.files.len(),
            });
        }
        if commit.removed_lines() == 0 {
            return Some(Rejection::NoDeletions);
        }
        if commit.timestamp.with_timezone(&chrono::Utc) >= self.config.cutoff {
            return Some(Rejection::AfterCutoff);
        }
        None
    }
}

#[async_trait]
impl StageProcessor for RefineProcessor {
    type Input = TriagedCommit;
    type Output = RefinedCommit;

    fn stage(&self) -> Stage {
        Stage::Refine
    }

    async fn process(&self, _key: &str, triaged: TriagedCommit) -> RecordOutcome<RefinedCommit> {
        if let Some(rejection) = self.screen(&triaged) {
            return RecordOutcome::Rejected(rejection);
        }
        let commit = &triaged.commit;
        let Some(file) = commit.files.first() else {
            return RecordOutcome::Rejected(Rejection::MultipleFiles { count: 0 });
        };

        let mut sides = Vec::with_capacity(2);
        for side in [Side::Before, Side::After] {
            match self.history.snapshot(&commit.hash, &file.path, side).await {
                Ok(Some(text)) => sides.push(text),
                Ok(None) => {
                    let side = match side {
                        Side::Before => "before",
                        Side::After => "after",
                    };
                    return RecordOutcome::Rejected(Rejection::SnapshotUnavailable { side });
                }
                Err(err) => return RecordOutcome::Failed(err.to_string()),
            }
        }
        let after_text = sides.pop().unwrap_or_default();
        let before_text = sides.pop().unwrap_or_default();

        let before_extents = function_extents(&before_text);
        let after_extents = function_extents(&after_text);
        let (old_fn, new_fn) = match pair_extents(file, &before_extents, &after_extents) {
            Ok(pair) => pair,
            Err(rejection) => return RecordOutcome::Rejected(rejection),
        };

        let before_body = old_fn.text(&before_text).to_string();
        let after_body = new_fn.text(&after_text).to_string();
        if normalize_whitespace(&before_body) == normalize_whitespace(&after_body) {
            return RecordOutcome::Rejected(Rejection::NoOp);
        }
        if same_token_stream(&before_body, &after_body) {
            return RecordOutcome::Rejected(Rejection::FormattingOnly);
        }
        let tokens = count_tokens(&before_body);
        if tokens >= self.config.max_function_tokens {
            return RecordOutcome::Rejected(Rejection::FunctionTooLong { tokens });
        }

        let pair = FunctionPair {
            name: old_fn.name.clone(),
            signature: old_fn.signature.clone(),
            before_body,
            after_body,
            before_lines: LineRange {
                start: old_fn.start_line,
                end: old_fn.end_line,
            },
            after_lines: LineRange {
                start: new_fn.start_line,
                end: new_fn.end_line,
            },
            commit: commit.key(),
        };
        let snapshot = FileSnapshot {
            path: file.path.clone(),
            before: before_text,
            after: after_text,
        };
        RecordOutcome::Kept(RefinedCommit {
            triaged,
            snapshot,
            pair,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Commit;
    use crate::history::MemoryHistory;
    use chrono::DateTime;

    const BEFORE: &str = "#include <string.h>

static int helper(int x)
{
    return x + 1;
}

int parse_header(char *buf)
{
    char name[8];
    strcpy(name, buf);
    return 0;
}
";

    const AFTER: &str = "#include <string.h>

static int helper(int x)
{
    return x + 1;
}

int parse_header(char *buf)
{
    char name[8];
    strncpy(name, buf, sizeof(name) - 1);
    name[sizeof(name) - 1] = '\\0';
    return 0;
}
";

    const PATCH: &str = "diff --git a/src/hdr.c b/src/hdr.c
--- a/src/hdr.c
+++ b/src/hdr.c
@@ -9,5 +9,6 @@ int parse_header(char *buf)
 {
     char name[8];
-    strcpy(name, buf);
+    strncpy(name, buf, sizeof(name) - 1);
+    name[sizeof(name) - 1] = '\\0';
     return 0;
 }
";

    fn triaged(patch: &str, date: &str, verdict: SecurityVerdict) -> TriagedCommit {
        let ts = DateTime::parse_from_rfc3339(date).unwrap();
        TriagedCommit {
            commit: Commit::from_patch("demo", "c1", "fix buffer overflow", ts, patch).unwrap(),
            verdict,
            oracle_response: "Answer: yes".into(),
        }
    }

    fn processor(before: &str, after: &str) -> RefineProcessor {
        let history = MemoryHistory::new("demo").with_file("c1", "src/hdr.c", Some(before), Some(after));
        RefineProcessor::new(Arc::new(history), RefineConfig::default())
    }

    #[tokio::test]
    async fn resolves_single_function_pair() {
        let refine = processor(BEFORE, AFTER);
        let outcome = refine
            .process("demo@c1", triaged(PATCH, "2021-01-01T00:00:00Z", SecurityVerdict::ConfirmedFix))
            .await;
        let RecordOutcome::Kept(refined) = outcome else {
            panic!("expected kept, got {outcome:?}");
        };
        assert_eq!(refined.pair.name, "parse_header");
        assert_eq!(refined.pair.before_lines, LineRange { start: 8, end: 13 });
        assert_eq!(refined.pair.after_lines, LineRange { start: 8, end: 14 });
        assert!(refined.pair.before_body.starts_with("int parse_header(char *buf)"));
        assert!(refined.pair.before_body.contains("strcpy(name, buf);"));
        assert!(refined.pair.after_body.contains("strncpy"));
        assert_eq!(refined.snapshot.path, "src/hdr.c");
    }

    #[tokio::test]
    async fn rejects_in_order() {
        let refine = processor(BEFORE, AFTER);
        let outcome = refine
            .process("k", triaged(PATCH, "2021-01-01T00:00:00Z", SecurityVerdict::NotAFix))
            .await;
        assert_eq!(
            outcome,
            RecordOutcome::Rejected(Rejection::Verdict(SecurityVerdict::NotAFix))
        );

        let outcome = refine
            .process("k", triaged(PATCH, "2023-01-01T00:00:00Z", SecurityVerdict::ConfirmedFix))
            .await;
        assert_eq!(outcome, RecordOutcome::Rejected(Rejection::AfterCutoff));

        let additions_only = "--- a/src/hdr.c\n+++ b/src/hdr.c\n@@ -10,0 +11,1 @@\n+    name[0] = 0;\n";
        let outcome = refine
            .process("k", triaged(additions_only, "2021-01-01T00:00:00Z", SecurityVerdict::ConfirmedFix))
            .await;
        assert_eq!(outcome, RecordOutcome::Rejected(Rejection::NoDeletions));
    }

    #[tokio::test]
    async fn rejects_formatting_only_and_missing_snapshots() {
        let reformatted = BEFORE.replace("strcpy(name, buf);", "strcpy( name,  buf ); /* ok */");
        let patch = "--- a/src/hdr.c\n+++ b/src/hdr.c\n@@ -11,1 +11,1 @@\n-    strcpy(name, buf);\n+    strcpy( name,  buf ); /* ok */\n";
        let refine = processor(BEFORE, &reformatted);
        let outcome = refine
            .process("k", triaged(patch, "2021-01-01T00:00:00Z", SecurityVerdict::ConfirmedFix))
            .await;
        assert_eq!(outcome, RecordOutcome::Rejected(Rejection::FormattingOnly));

        let history = MemoryHistory::new("demo").with_file("c1", "src/hdr.c", None, Some(AFTER));
        let refine = RefineProcessor::new(Arc::new(history), RefineConfig::default());
        let outcome = refine
            .process("k", triaged(PATCH, "2021-01-01T00:00:00Z", SecurityVerdict::ConfirmedFix))
            .await;
        assert_eq!(
            outcome,
            RecordOutcome::Rejected(Rejection::SnapshotUnavailable { side: "before" })
        );
    }

    #[tokio::test]
    async fn rejects_changes_across_functions() {
        let before = BEFORE.replace("return x + 1;", "return x;");
        let after = AFTER.replace("return x + 1;", "return x + 2;");
        let patch = format!(
            "--- a/src/hdr.c\n+++ b/src/hdr.c\n@@ -5,1 +5,1 @@\n-    return x;\n+    return x + 2;\n{}",
            &PATCH[PATCH.find("@@").unwrap()..]
        );
        let refine = processor(&before, &after);
        let outcome = refine
            .process("k", triaged(&patch, "2021-01-01T00:00:00Z", SecurityVerdict::ConfirmedFix))
            .await;
        assert_eq!(
            outcome,
            RecordOutcome::Rejected(Rejection::MultipleFunctions {
                names: vec!["helper".into(), "parse_header".into()]
            })
        );
    }

    #[tokio::test]
    async fn rejects_oversized_functions() {
        let history = MemoryHistory::new("demo").with_file("c1", "src/hdr.c", Some(BEFORE), Some(AFTER));
        let config = RefineConfig {
            max_function_tokens: 10,
            ..RefineConfig::default()
        };
        let refine = RefineProcessor::new(Arc::new(history), config);
        let outcome = refine
            .process("k", triaged(PATCH, "2021-01-01T00:00:00Z", SecurityVerdict::ConfirmedFix))
            .await;
        assert!(matches!(
            outcome,
            RecordOutcome::Rejected(Rejection::FunctionTooLong { .. })
        ));
    }
}
