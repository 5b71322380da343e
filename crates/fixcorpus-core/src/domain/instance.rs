//! Terminal training artifact.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use super::records::{Span, SpanAgreement, UndefinedElement};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Explanation {
    pub root_cause: String,
    pub impact: String,
}

/// Chain back to the originating commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub repo: String,
    pub commit: String,
    pub path: String,
    pub function: String,
    pub timestamp: DateTime<FixedOffset>,
    /// Span derived from the fixing diff (S2)
    pub diff_span: Span,
    /// Span re-derived without the diff (S3)
    pub located_span: Span,
    pub agreement: SpanAgreement,
}

/// One (masked code, fix, explanation) training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingInstance {
    pub id: String,
    pub prompt: String,
    pub masked_code: String,
    pub ground_truth: String,
    pub fixed_code: String,
    pub explanation: Explanation,
    pub context: Vec<UndefinedElement>,
    pub provenance: Provenance,
}
