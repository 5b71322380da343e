//! Stage runner: index ranges, resumable cursors and the worker pool.
//!
//! A stage reads its predecessor's key-ordered output, processes the
//! requested `[start, end)` slice in batches on a bounded pool of tokio
//! tasks, and after every batch replaces its output blob and then its
//! cursor. Records already in the output are never resubmitted; failed
//! records, including ones whose task panicked, stay uncovered so the next
//! run of the range retries them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use fixcorpus_store::{load_json, save_json, BlobStore, ContentDigest, IndexRange, StageCursor, StorageError};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, Span};

use crate::config::{RetrievalConfig, WorkerConfig};
use crate::domain::Commit;
use crate::error::{PipelineError, PipelineResult};
use crate::history::HistorySource;
use crate::obs::{self, StageSpan};
use crate::stages::{retrieve, RecordOutcome, Stage, StageProcessor};

/// Which slice of the input to process, and whether to discard progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub start: Option<usize>,
    pub end: Option<usize>,
    pub restart: bool,
}

impl RunOptions {
    pub fn range(start: usize, end: usize) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            restart: false,
        }
    }

    /// Resolve against `len` input records.
    pub fn resolve(&self, len: usize) -> PipelineResult<IndexRange> {
        let start = self.start.unwrap_or(0);
        let end = self.end.unwrap_or(len);
        if start > end || end > len {
            return Err(PipelineError::InvalidRange { start, end, len });
        }
        Ok(IndexRange::new(start, end))
    }
}

/// Outcome counts of one stage run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub run_id: String,
    pub range: Option<IndexRange>,
    pub input_len: usize,
    /// Records handed to the processor
    pub attempted: usize,
    /// Records already present in the output
    pub skipped: usize,
    pub kept: usize,
    pub rejected: usize,
    pub invalid: usize,
    pub failed: usize,
    /// Input indices covered by the cursor after the run
    pub covered: usize,
    pub complete: bool,
}

/// Runs one [`StageProcessor`] against a blob store.
pub struct StageRunner<P: StageProcessor> {
    store: Arc<dyn BlobStore>,
    processor: Arc<P>,
    worker: WorkerConfig,
    run_id: String,
}

impl<P: StageProcessor> StageRunner<P> {
    pub fn new(store: Arc<dyn BlobStore>, processor: P, worker: WorkerConfig, run_id: &str) -> Self {
        Self {
            store,
            processor: Arc::new(processor),
            worker,
            run_id: run_id.to_string(),
        }
    }

    pub async fn run(&self, options: &RunOptions) -> PipelineResult<StageReport> {
        let span = StageSpan::new(&self.run_id, self.processor.stage());
        self.run_in_span(options).instrument(span.span()).await
    }

    async fn run_in_span(&self, options: &RunOptions) -> PipelineResult<StageReport> {
        let started = Instant::now();
        let stage = self.processor.stage();
        let store = self.store.as_ref();
        let _lock = store.lock(stage.key())?;

        let (input, digest) = load_input::<P::Input>(store, stage).await?;
        let len = input.len();
        let range = options.resolve(len)?;
        let (mut cursor, mut output) = self.resume(stage, digest, len, options.restart).await?;

        obs::emit_stage_started(&self.run_id, stage, range.start, range.end, len);
        let mut report = StageReport {
            stage: stage.key().to_string(),
            run_id: self.run_id.clone(),
            range: Some(range),
            input_len: len,
            ..StageReport::default()
        };

        let entries: Vec<(String, P::Input)> = input.into_iter().collect();
        let batch_size = self.worker.batch_size.max(1);
        for gap in cursor.uncovered_within(range) {
            let mut batch_start = gap.start;
            while batch_start < gap.end {
                let batch = IndexRange::new(batch_start, (batch_start + batch_size).min(gap.end));
                self.run_batch(&entries, batch, &mut output, &mut cursor, &mut report)
                    .await?;
                batch_start = batch.end;
            }
        }

        report.covered = cursor.covered_count();
        report.complete = cursor.is_complete();
        obs::emit_stage_finished(
            &self.run_id,
            stage,
            started.elapsed().as_millis() as u64,
            report.kept,
            report.rejected,
            report.invalid,
            report.failed,
            report.complete,
        );
        Ok(report)
    }

    /// Continue from the stored cursor, or start over with empty output.
    async fn resume(
        &self,
        stage: Stage,
        digest: ContentDigest,
        len: usize,
        restart: bool,
    ) -> PipelineResult<(StageCursor, BTreeMap<String, P::Output>)> {
        let store = self.store.as_ref();
        let existing: Option<StageCursor> = load_json(store, &stage.cursor_key()).await?;
        let output: Option<BTreeMap<String, P::Output>> = load_json(store, &stage.output_key()).await?;

        match (existing, output) {
            (Some(mut cursor), Some(output)) if !restart && cursor.matches_input(&digest, len) => {
                cursor.run_id = self.run_id.clone();
                tracing::info!(covered = cursor.covered_count(), len, "resuming from cursor");
                return Ok((cursor, output));
            }
            (Some(cursor), _) if !cursor.matches_input(&digest, len) => {
                obs::emit_cursor_reset(stage, cursor.input_digest.short(), digest.short());
            }
            _ => {}
        }

        let cursor = StageCursor::new(stage.key(), &self.run_id, digest, len);
        let output = BTreeMap::new();
        save_json(store, &stage.output_key(), &output).await?;
        save_json(store, &stage.cursor_key(), &cursor).await?;
        Ok((cursor, output))
    }

    async fn run_batch(
        &self,
        entries: &[(String, P::Input)],
        batch: IndexRange,
        output: &mut BTreeMap<String, P::Output>,
        cursor: &mut StageCursor,
        report: &mut StageReport,
    ) -> PipelineResult<()> {
        let stage = self.processor.stage();
        let sem = Arc::new(Semaphore::new(self.worker.concurrency.max(1)));
        let mut tasks: JoinSet<(usize, String, RecordOutcome<P::Output>)> = JoinSet::new();

        for (idx, (key, input)) in entries
            .iter()
            .enumerate()
            .take(batch.end)
            .skip(batch.start)
        {
            if output.contains_key(key) {
                report.skipped += 1;
                continue;
            }
            report.attempted += 1;
            let processor = Arc::clone(&self.processor);
            let sem = Arc::clone(&sem);
            let key = key.clone();
            let input = input.clone();
            tasks.spawn(
                async move {
                    let _permit = sem.acquire_owned().await.ok();
                    // A panic in one record is that record's failure only.
                    let record_key = key.clone();
                    let record = tokio::spawn(
                        async move { processor.process(&record_key, input).await }
                            .instrument(Span::current()),
                    );
                    let outcome = match record.await {
                        Ok(outcome) => outcome,
                        Err(e) => RecordOutcome::Failed(format!("worker task failed: {e}")),
                    };
                    (idx, key, outcome)
                }
                .instrument(Span::current()),
            );
        }

        let mut results = Vec::with_capacity(batch.len());
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| PipelineError::Worker(e.to_string()))?;
            results.push(result);
        }
        results.sort_by_key(|(idx, _, _)| *idx);

        let mut failed: Vec<usize> = Vec::new();
        let mut kept = 0;
        for (idx, key, outcome) in results {
            match outcome {
                RecordOutcome::Kept(record) => {
                    output.insert(key, record);
                    kept += 1;
                }
                RecordOutcome::Rejected(reason) => {
                    obs::emit_record_rejected(stage, &key, &reason);
                    report.rejected += 1;
                }
                RecordOutcome::Invalid { reason, raw } => {
                    obs::emit_record_invalid(stage, &key, &reason, &raw);
                    report.invalid += 1;
                }
                RecordOutcome::Failed(error) => {
                    obs::emit_record_failed(stage, &key, &error);
                    report.failed += 1;
                    failed.push(idx);
                }
            }
        }
        report.kept += kept;

        for covered in covered_runs(batch, &failed) {
            cursor.mark_covered(covered);
        }
        let store = self.store.as_ref();
        save_json(store, &stage.output_key(), &*output).await?;
        save_json(store, &stage.cursor_key(), &*cursor).await?;
        obs::emit_batch_committed(stage, batch.start, batch.end, kept, cursor.covered_count());
        Ok(())
    }
}

/// Sub-ranges of `batch` that exclude the sorted `failed` indices.
fn covered_runs(batch: IndexRange, failed: &[usize]) -> Vec<IndexRange> {
    let mut runs = Vec::new();
    let mut pos = batch.start;
    for &idx in failed {
        if idx > pos {
            runs.push(IndexRange::new(pos, idx));
        }
        pos = idx + 1;
    }
    if pos < batch.end {
        runs.push(IndexRange::new(pos, batch.end));
    }
    runs
}

/// Load a predecessor's output, requiring its cursor to be complete.
async fn load_input<T: serde::de::DeserializeOwned>(
    store: &dyn BlobStore,
    stage: Stage,
) -> PipelineResult<(BTreeMap<String, T>, ContentDigest)> {
    let predecessor = stage
        .predecessor()
        .ok_or_else(|| PipelineError::Config(format!("{stage} has no predecessor stage")))?;
    let incomplete = |covered: usize, len: usize| PipelineError::PredecessorIncomplete {
        stage: stage.key().to_string(),
        predecessor: predecessor.key().to_string(),
        covered,
        len,
    };

    let cursor: StageCursor = load_json(store, &predecessor.cursor_key())
        .await?
        .ok_or_else(|| incomplete(0, 0))?;
    if !cursor.is_complete() {
        return Err(incomplete(cursor.covered_count(), cursor.input_len));
    }
    let bytes = match store.get(&predecessor.output_key()).await {
        Ok(bytes) => bytes,
        Err(StorageError::NotFound { .. }) => {
            return Err(incomplete(cursor.covered_count(), cursor.input_len))
        }
        Err(e) => return Err(e.into()),
    };
    let digest = ContentDigest::from_bytes(&bytes);
    let input: BTreeMap<String, T> = serde_json::from_slice(&bytes)?;
    Ok((input, digest))
}

/// S0a: retrieve from `history` and persist the commit map with a
/// complete cursor.
pub async fn run_retrieve(
    store: &dyn BlobStore,
    history: &dyn HistorySource,
    config: &RetrievalConfig,
    run_id: &str,
) -> PipelineResult<StageReport> {
    let span = StageSpan::new(run_id, Stage::Retrieve);
    retrieve_in_span(store, history, config, run_id)
        .instrument(span.span())
        .await
}

async fn retrieve_in_span(
    store: &dyn BlobStore,
    history: &dyn HistorySource,
    config: &RetrievalConfig,
    run_id: &str,
) -> PipelineResult<StageReport> {
    let stage = Stage::Retrieve;
    let started = Instant::now();
    let _lock = store.lock(stage.key())?;
    let (commits, summary): (BTreeMap<String, Commit>, _) = retrieve(history, config).await?;

    let source = format!("{}\n{}", history.repo_id(), config.keywords.join("\n"));
    let mut cursor = StageCursor::new(
        stage.key(),
        run_id,
        ContentDigest::from_bytes(source.as_bytes()),
        commits.len(),
    );
    cursor.mark_covered(IndexRange::new(0, commits.len()));
    save_json(store, &stage.output_key(), &commits).await?;
    save_json(store, &stage.cursor_key(), &cursor).await?;

    let rejected = summary.candidates.saturating_sub(summary.kept);
    obs::emit_stage_finished(
        run_id,
        stage,
        started.elapsed().as_millis() as u64,
        summary.kept,
        rejected,
        0,
        0,
        true,
    );
    Ok(StageReport {
        stage: stage.key().to_string(),
        run_id: run_id.to_string(),
        range: None,
        input_len: summary.candidates,
        attempted: summary.candidates,
        kept: summary.kept,
        rejected,
        covered: cursor.covered_count(),
        complete: true,
        ..StageReport::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_resolution() {
        assert_eq!(RunOptions::default().resolve(5).unwrap(), IndexRange::new(0, 5));
        assert_eq!(RunOptions::range(2, 4).resolve(5).unwrap(), IndexRange::new(2, 4));
        assert_eq!(RunOptions::range(0, 0).resolve(0).unwrap(), IndexRange::new(0, 0));
        assert!(matches!(
            RunOptions::range(4, 2).resolve(5),
            Err(PipelineError::InvalidRange { start: 4, end: 2, len: 5 })
        ));
        assert!(matches!(
            RunOptions::range(0, 6).resolve(5),
            Err(PipelineError::InvalidRange { .. })
        ));
    }

    #[test]
    fn failed_indices_split_coverage() {
        let batch = IndexRange::new(10, 16);
        assert_eq!(covered_runs(batch, &[]), vec![IndexRange::new(10, 16)]);
        assert_eq!(
            covered_runs(batch, &[10, 13]),
            vec![IndexRange::new(11, 13), IndexRange::new(14, 16)]
        );
        assert_eq!(covered_runs(batch, &[15]), vec![IndexRange::new(10, 15)]);
        assert!(covered_runs(IndexRange::new(3, 4), &[3]).is_empty());
    }
}
