//! Structured observability hooks for stage runs.
//!
//! This module provides:
//! - Stage-scoped tracing spans via [`StageSpan`]
//! - Emission functions for lifecycle events: start, batch commit, finish,
//!   and per-record rejections, invalid oracle answers and failures
//!
//! Events are emitted with an `event` field so JSON logs can be filtered
//! by kind (`--json` on the CLI, or `RUST_LOG` for levels).

use std::time::Instant;

use tracing::span::Entered;
use tracing::{debug, info, warn};

use crate::stages::{Rejection, Stage};

/// A span tagged with the run and stage, carried into worker tasks.
///
/// Dropping the guard emits `stage.closed` inside the span, whether the
/// run finished, failed or was cancelled.
///
/// # Example
///
/// ```ignore
/// let span = StageSpan::new("run-12345", Stage::Mask);
/// runner.run().instrument(span.span()).await;
/// ```
#[derive(Debug)]
pub struct StageSpan {
    span: tracing::Span,
    stage: Stage,
    opened: Instant,
}

impl StageSpan {
    pub fn new(run_id: &str, stage: Stage) -> Self {
        Self {
            span: tracing::info_span!("fixcorpus.stage", run_id = %run_id, stage = %stage),
            stage,
            opened: Instant::now(),
        }
    }

    pub fn span(&self) -> tracing::Span {
        self.span.clone()
    }

    /// Enter the span for a synchronous section.
    pub fn enter(&self) -> Entered<'_> {
        self.span.enter()
    }
}

impl Drop for StageSpan {
    fn drop(&mut self) {
        let _entered = self.span.enter();
        debug!(
            event = "stage.closed",
            stage = %self.stage,
            elapsed_ms = self.opened.elapsed().as_millis() as u64,
        );
    }
}

/// Emit event: a stage run started over `[start, end)` of `input_len` records.
pub fn emit_stage_started(run_id: &str, stage: Stage, start: usize, end: usize, input_len: usize) {
    info!(
        event = "stage.started",
        run_id = %run_id,
        stage = %stage,
        start = start,
        end = end,
        input_len = input_len,
    );
}

/// Emit event: a batch was persisted and the cursor advanced.
pub fn emit_batch_committed(stage: Stage, start: usize, end: usize, kept: usize, covered: usize) {
    info!(
        event = "stage.batch_committed",
        stage = %stage,
        start = start,
        end = end,
        kept = kept,
        covered = covered,
    );
}

/// Emit event: stage run finished with per-outcome counts.
#[allow(clippy::too_many_arguments)]
pub fn emit_stage_finished(
    run_id: &str,
    stage: Stage,
    duration_ms: u64,
    kept: usize,
    rejected: usize,
    invalid: usize,
    failed: usize,
    complete: bool,
) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        duration_ms = duration_ms,
        kept = kept,
        rejected = rejected,
        invalid = invalid,
        failed = failed,
        complete = complete,
    );
}

/// Emit event: a deterministic filter dropped a record.
pub fn emit_record_rejected(stage: Stage, key: &str, reason: &Rejection) {
    debug!(event = "record.rejected", stage = %stage, record = %key, reason = %reason);
}

/// Emit event: the oracle answered but the answer failed validation (warning level).
///
/// The raw response is logged in full for audit.
pub fn emit_record_invalid(stage: Stage, key: &str, reason: &str, raw: &str) {
    warn!(event = "record.invalid", stage = %stage, record = %key, reason = %reason, raw = %raw);
}

/// Emit event: the oracle was unavailable for a record (warning level).
pub fn emit_record_failed(stage: Stage, key: &str, error: &str) {
    warn!(event = "record.failed", stage = %stage, record = %key, error = %error);
}

/// Emit event: the predecessor output changed, so progress starts over.
pub fn emit_cursor_reset(stage: Stage, previous: &str, current: &str) {
    warn!(
        event = "stage.cursor_reset",
        stage = %stage,
        previous_digest = %previous,
        current_digest = %current,
    );
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = out.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn entered_stage_span_tags_events() {
        let logs = capture(|| {
            let span = StageSpan::new("run-7", Stage::Mask);
            let _entered = span.enter();
            emit_record_rejected(Stage::Mask, "demo@c1", &Rejection::PlaceholderPresent);
        });
        let line = logs.lines().find(|l| l.contains("record.rejected")).unwrap();
        assert!(line.contains("run_id=run-7"), "{line}");
    }

    #[test]
    fn dropping_stage_span_closes_the_stage() {
        let logs = capture(|| {
            let span = StageSpan::new("run-8", Stage::Explain);
            let task_span = span.span();
            drop(span);
            assert!(!task_span.is_disabled());
        });
        let line = logs.lines().find(|l| l.contains("stage.closed")).unwrap();
        assert!(line.contains("run_id=run-8"), "{line}");
        assert!(line.contains("elapsed_ms="), "{line}");
    }
}
