//! Pipeline facade: wires stage processors to one store, one oracle and
//! one configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use fixcorpus_oracle::{Oracle, RetryingOracle};
use fixcorpus_store::{load_json, BlobStore, StageCursor};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::domain::TrainingInstance;
use crate::error::PipelineResult;
use crate::history::HistorySource;
use crate::runner::{run_retrieve, RunOptions, StageReport, StageRunner};
use crate::stages::{
    AssembleProcessor, ExplainProcessor, MaskProcessor, RefineProcessor, ResolveProcessor, Stage,
    StageProcessor, TriageProcessor,
};

/// Stored progress of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStatus {
    pub stage: Stage,
    /// Records in the stage output, if it has been written
    pub records: Option<usize>,
    pub input_len: Option<usize>,
    pub covered: usize,
    pub complete: bool,
    pub last_run: Option<String>,
}

pub struct Pipeline {
    store: Arc<dyn BlobStore>,
    oracle: Arc<dyn Oracle>,
    config: PipelineConfig,
    run_id: String,
}

impl Pipeline {
    /// The oracle is wrapped with the configured retry policy.
    pub fn new(store: Arc<dyn BlobStore>, oracle: Arc<dyn Oracle>, config: PipelineConfig) -> Self {
        let oracle: Arc<dyn Oracle> = Arc::new(RetryingOracle::new(oracle, config.retry.clone()));
        Self {
            store,
            oracle,
            config,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    async fn run_stage<P: StageProcessor>(
        &self,
        processor: P,
        options: &RunOptions,
    ) -> PipelineResult<StageReport> {
        StageRunner::new(
            Arc::clone(&self.store),
            processor,
            self.config.worker.clone(),
            &self.run_id,
        )
        .run(options)
        .await
    }

    pub async fn retrieve(&self, history: &dyn HistorySource) -> PipelineResult<StageReport> {
        run_retrieve(self.store.as_ref(), history, &self.config.retrieval, &self.run_id).await
    }

    pub async fn triage(&self, options: &RunOptions) -> PipelineResult<StageReport> {
        let processor = TriageProcessor::new(Arc::clone(&self.oracle), self.config.retrieval.clone());
        self.run_stage(processor, options).await
    }

    pub async fn refine(
        &self,
        history: Arc<dyn HistorySource>,
        options: &RunOptions,
    ) -> PipelineResult<StageReport> {
        let processor = RefineProcessor::new(history, self.config.refine.clone());
        self.run_stage(processor, options).await
    }

    pub async fn mask(&self, options: &RunOptions) -> PipelineResult<StageReport> {
        let processor = MaskProcessor::new(Arc::clone(&self.oracle), self.config.mask.clone());
        self.run_stage(processor, options).await
    }

    pub async fn resolve(&self, options: &RunOptions) -> PipelineResult<StageReport> {
        let processor = ResolveProcessor::new(Arc::clone(&self.oracle), &self.config.resolver)?;
        self.run_stage(processor, options).await
    }

    pub async fn explain(&self, options: &RunOptions) -> PipelineResult<StageReport> {
        let processor = ExplainProcessor::new(Arc::clone(&self.oracle));
        self.run_stage(processor, options).await
    }

    pub async fn assemble(&self, options: &RunOptions) -> PipelineResult<StageReport> {
        self.run_stage(AssembleProcessor::new(), options).await
    }

    /// Run every stage over its full input, stopping after the first stage
    /// that leaves records uncovered.
    pub async fn run_all(&self, history: Arc<dyn HistorySource>) -> PipelineResult<Vec<StageReport>> {
        let all = RunOptions::default();
        let mut reports = vec![self.retrieve(history.as_ref()).await?];
        for stage in &Stage::ALL[1..] {
            let report = match stage {
                Stage::Triage => self.triage(&all).await?,
                Stage::Refine => self.refine(Arc::clone(&history), &all).await?,
                Stage::Mask => self.mask(&all).await?,
                Stage::Resolve => self.resolve(&all).await?,
                Stage::Explain => self.explain(&all).await?,
                Stage::Assemble => self.assemble(&all).await?,
                Stage::Retrieve => continue,
            };
            let complete = report.complete;
            reports.push(report);
            if !complete {
                tracing::warn!(stage = %stage, "stage left failed records uncovered, stopping");
                break;
            }
        }
        Ok(reports)
    }

    pub async fn status(&self) -> PipelineResult<Vec<StageStatus>> {
        let store = self.store.as_ref();
        let mut out = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            let records: Option<BTreeMap<String, serde_json::Value>> =
                load_json(store, &stage.output_key()).await?;
            let cursor: Option<StageCursor> = load_json(store, &stage.cursor_key()).await?;
            out.push(StageStatus {
                stage,
                records: records.map(|r| r.len()),
                input_len: cursor.as_ref().map(|c| c.input_len),
                covered: cursor.as_ref().map_or(0, StageCursor::covered_count),
                complete: cursor.as_ref().is_some_and(StageCursor::is_complete),
                last_run: cursor.map(|c| c.run_id),
            });
        }
        Ok(out)
    }

    /// Assembled instances in key order.
    pub async fn instances(&self) -> PipelineResult<Vec<TrainingInstance>> {
        let map: Option<BTreeMap<String, TrainingInstance>> =
            load_json(self.store.as_ref(), &Stage::Assemble.output_key()).await?;
        Ok(map.unwrap_or_default().into_values().collect())
    }

    /// Write the assembled instances as JSON Lines; returns how many.
    pub async fn export_jsonl(&self, path: &Path) -> PipelineResult<usize> {
        let instances = self.instances().await?;
        let mut buf = String::new();
        for instance in &instances {
            buf.push_str(&serde_json::to_string(instance)?);
            buf.push('\n');
        }
        tokio::fs::write(path, buf).await?;
        tracing::info!(path = %path.display(), count = instances.len(), "exported instances");
        Ok(instances.len())
    }
}
