//! Record schema, from retrieved commits to training instances.

pub mod commit;
pub mod instance;
pub mod records;

pub use commit::{Commit, DiffLine, FileDiff, Hunk, InvalidRecordKey, Language, RecordKey};
pub use instance::{Explanation, Provenance, TrainingInstance};
pub use records::{
    DefinitionSite, ElementKind, ExplainedRecord, FileSnapshot, FunctionPair, LineRange,
    MaskedFunction, MaskedRecord, RefinedCommit, ResolvedRecord, SecurityVerdict, Side, Span,
    SpanAgreement, TriagedCommit, UndefinedElement, UsageSite, VulnerabilityExplanation,
};
