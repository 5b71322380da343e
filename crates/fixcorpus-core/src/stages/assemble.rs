//! S4: join upstream annotations into training instances.

use async_trait::async_trait;

use super::{RecordOutcome, Rejection, Stage, StageProcessor};
use crate::domain::{Explanation, ExplainedRecord, Provenance, TrainingInstance};
use crate::prompts;

#[derive(Debug, Default)]
pub struct AssembleProcessor;

impl AssembleProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Build the instance, or name the upstream field that is missing.
    pub fn assemble(&self, key: &str, record: &ExplainedRecord) -> Result<TrainingInstance, Rejection> {
        let masked_record = record.masked();
        let masked = &masked_record.masked;
        let pair = masked_record.pair();
        let commit = masked_record.refined.commit();
        let explanation = &record.explanation;

        if masked.placeholder_count() != 1 {
            return Err(Rejection::MissingUpstream { field: "placeholder" });
        }
        if masked.ground_truth.trim().is_empty() {
            return Err(Rejection::MissingUpstream { field: "ground_truth" });
        }
        if explanation.root_cause.trim().is_empty() {
            return Err(Rejection::MissingUpstream { field: "root_cause" });
        }
        if explanation.impact.trim().is_empty() {
            return Err(Rejection::MissingUpstream { field: "impact" });
        }

        let context = record.resolved.elements.clone();
        Ok(TrainingInstance {
            id: key.to_string(),
            prompt: prompts::instruction(masked, &context),
            masked_code: masked.masked_body.clone(),
            ground_truth: masked.ground_truth.clone(),
            fixed_code: pair.after_body.clone(),
            explanation: Explanation {
                root_cause: explanation.root_cause.clone(),
                impact: explanation.impact.clone(),
            },
            context,
            provenance: Provenance {
                repo: commit.repo.clone(),
                commit: commit.hash.clone(),
                path: masked_record.refined.snapshot.path.clone(),
                function: pair.name.clone(),
                timestamp: commit.timestamp,
                diff_span: masked.span,
                located_span: explanation.located_span,
                agreement: explanation.agreement,
            },
        })
    }
}

#[async_trait]
impl StageProcessor for AssembleProcessor {
    type Input = ExplainedRecord;
    type Output = TrainingInstance;

    fn stage(&self) -> Stage {
        Stage::Assemble
    }

    async fn process(&self, key: &str, record: ExplainedRecord) -> RecordOutcome<TrainingInstance> {
        match self.assemble(key, &record) {
            Ok(instance) => RecordOutcome::Kept(instance),
            Err(rejection) => RecordOutcome::Rejected(rejection),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SpanAgreement, VulnerabilityExplanation};
    use crate::stages::fixtures::{resolved, AFTER};

    fn record(root_cause: &str) -> ExplainedRecord {
        let resolved = resolved();
        let span = resolved.masked.masked.span;
        ExplainedRecord {
            resolved,
            explanation: VulnerabilityExplanation {
                located_span: span,
                located_text: "strcpy(buf, s);".into(),
                agreement: SpanAgreement::between(&span, &span),
                root_cause: root_cause.into(),
                impact: "Stack memory past buf is overwritten.".into(),
                locate_response: "line 3".into(),
                explain_response: "...".into(),
            },
        }
    }

    #[test]
    fn composes_instance_from_upstream_fields() {
        let instance = AssembleProcessor::new()
            .assemble("demo@c1", &record("Unbounded copy into buf."))
            .unwrap();
        assert_eq!(instance.id, "demo@c1");
        assert_eq!(instance.masked_code, "int f(char *s)\n{\n    <MASK_1>\n}");
        assert_eq!(instance.ground_truth, "strcpy(buf, s);");
        assert_eq!(instance.fixed_code, AFTER);
        assert!(instance.prompt.contains("<MASK_1>"));
        assert_eq!(instance.provenance.path, "f.c");
        assert_eq!(instance.provenance.function, "f");
        assert!(instance.provenance.agreement.exact);
        assert_eq!(instance.provenance.timestamp.to_rfc3339(), "2021-07-04T10:00:00+02:00");
    }

    #[tokio::test]
    async fn blank_explanation_is_rejected() {
        let outcome = AssembleProcessor::new()
            .process("demo@c1", record("  "))
            .await;
        assert!(matches!(
            outcome,
            RecordOutcome::Rejected(Rejection::MissingUpstream { field: "root_cause" })
        ));
    }

    #[test]
    fn extra_placeholder_is_rejected() {
        let mut broken = record("Unbounded copy into buf.");
        broken.resolved.masked.masked.masked_body.push_str("\n<MASK_1>");
        let err = AssembleProcessor::new().assemble("demo@c1", &broken).unwrap_err();
        assert_eq!(err, Rejection::MissingUpstream { field: "placeholder" });
    }
}
