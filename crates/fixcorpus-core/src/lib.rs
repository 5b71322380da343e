//! fixcorpus-core: record schema, code analysis and stage processors
//!
//! ## Layer 2 - Domain
//!
//! Turns version-control history into (masked function, fix, explanation)
//! training instances through five stages:
//!
//! - S0 retrieve + triage: keyword retrieval, size filters, oracle verdict
//! - S1 refine: single-file, single-function changes with snapshots
//! - S2 mask + resolve: one `<MASK_1>` span and its undefined elements
//! - S3 explain: independent localization, root cause and impact
//! - S4 assemble: deterministic composition into [`TrainingInstance`]s
//!
//! Each stage is resumable over `[start, end)` slices of its input; see
//! [`runner`].

pub mod code;
pub mod config;
pub mod domain;
pub mod elements;
pub mod error;
pub mod history;
pub mod obs;
pub mod pipeline;
pub mod prompts;
pub mod response;
pub mod runner;
pub mod stages;
pub mod telemetry;

pub use config::{
    MaskConfig, PipelineConfig, RefineConfig, ResolverConfig, RetrievalConfig, WorkerConfig,
};
pub use domain::{
    Commit, ElementKind, ExplainedRecord, FunctionPair, MaskedFunction, MaskedRecord, RecordKey,
    RefinedCommit, ResolvedRecord, SecurityVerdict, Span, SpanAgreement, TrainingInstance,
    TriagedCommit, UndefinedElement,
};
pub use elements::ElementPolicy;
pub use error::{PipelineError, PipelineResult};
pub use history::{GitHistory, HistoryError, HistorySource, MemoryHistory};
pub use obs::StageSpan;
pub use pipeline::{Pipeline, StageStatus};
pub use runner::{run_retrieve, RunOptions, StageReport, StageRunner};
pub use stages::{RecordOutcome, Rejection, Stage, StageProcessor};
pub use telemetry::{init_tracing, level_for_verbosity, LogFormat};

/// fixcorpus version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
