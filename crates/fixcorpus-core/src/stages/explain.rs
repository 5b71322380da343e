//! S3: re-locate the vulnerability without the diff, then explain it.

use std::sync::Arc;

use async_trait::async_trait;
use fixcorpus_oracle::Oracle;

use super::{RecordOutcome, Stage, StageProcessor};
use crate::code::{find_verbatim, span_from_lines, SpanMatch};
use crate::domain::{
    ExplainedRecord, ResolvedRecord, Span, SpanAgreement, VulnerabilityExplanation,
};
use crate::prompts;
use crate::response::{parse_explanation, parse_locate, LocateAnswer};

pub struct ExplainProcessor {
    oracle: Arc<dyn Oracle>,
}

/// Map a locate answer onto `body`: a unique verbatim snippet wins, then
/// the reported line range.
pub fn located_span(body: &str, answer: &LocateAnswer) -> Result<Span, String> {
    let by_snippet = answer
        .snippet
        .as_deref()
        .map(|snippet| find_verbatim(body, snippet));
    if let Some(SpanMatch::Unique(span)) = by_snippet {
        return Ok(span);
    }
    if let Some((first, last)) = answer.lines {
        if let Some(span) = span_from_lines(body, first, last) {
            return Ok(span);
        }
    }
    Err(match (by_snippet, answer.lines) {
        (Some(SpanMatch::Ambiguous(n)), _) => format!("located snippet occurs {n} times in the body"),
        (_, Some((first, last))) => format!("lines {first}-{last} are outside the function"),
        _ => "located snippet is not a verbatim substring of the body".to_string(),
    })
}

impl ExplainProcessor {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl StageProcessor for ExplainProcessor {
    type Input = ResolvedRecord;
    type Output = ExplainedRecord;

    fn stage(&self) -> Stage {
        Stage::Explain
    }

    async fn process(&self, _key: &str, record: ResolvedRecord) -> RecordOutcome<ExplainedRecord> {
        let pair = record.masked.pair();
        let body = &pair.before_body;

        let locate_response = match self.oracle.locate(prompts::locate(pair, &record.elements)).await {
            Ok(text) => text,
            Err(err) => return RecordOutcome::failed(&err),
        };
        let located = match parse_locate(&locate_response)
            .map_err(|e| e.to_string())
            .and_then(|answer| located_span(body, &answer))
        {
            Ok(span) => span,
            Err(reason) => return RecordOutcome::invalid(reason, locate_response),
        };
        let located_text = body[located.start..located.end].to_string();

        let prompt = prompts::explain(pair, &located_text, &record.elements);
        let explain_response = match self.oracle.explain(prompt).await {
            Ok(text) => text,
            Err(err) => return RecordOutcome::failed(&err),
        };
        let explanation = match parse_explanation(&explain_response) {
            Ok(e) => e,
            Err(err) => return RecordOutcome::invalid(err, explain_response),
        };

        let agreement = SpanAgreement::between(&record.masked.masked.span, &located);
        RecordOutcome::Kept(ExplainedRecord {
            resolved: record,
            explanation: VulnerabilityExplanation {
                located_span: located,
                located_text,
                agreement,
                root_cause: explanation.root_cause,
                impact: explanation.impact,
                locate_response,
                explain_response,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use fixcorpus_oracle::{OracleTask, ScriptedOracle, ScriptedReply};

    use super::*;
    use crate::stages::fixtures::resolved;

    const EXPLANATION: &str =
        "Root Cause: strcpy copies s into buf without a length check.\nImpact: Stack memory past buf is overwritten.";

    async fn explain_with(locate: &str, explain: &str) -> (RecordOutcome<ExplainedRecord>, Arc<ScriptedOracle>) {
        let oracle = Arc::new(
            ScriptedOracle::new()
                .on(OracleTask::Locate, None, ScriptedReply::text(locate))
                .on(OracleTask::Explain, None, ScriptedReply::text(explain)),
        );
        let outcome = ExplainProcessor::new(oracle.clone())
            .process("demo@c1", resolved())
            .await;
        (outcome, oracle)
    }

    const BODY: &str = "int parse_header(char *buf)\n{\n    char name[8];\n    strcpy(name, buf);\n    return 0;\n}";

    fn answer(snippet: Option<&str>, lines: Option<(u32, u32)>) -> LocateAnswer {
        LocateAnswer {
            snippet: snippet.map(str::to_string),
            lines,
        }
    }

    #[test]
    fn snippet_takes_precedence_over_lines() {
        let span = located_span(BODY, &answer(Some("strcpy(name, buf);"), Some((3, 3)))).unwrap();
        assert_eq!(&BODY[span.start..span.end], "strcpy(name, buf);");
        assert_eq!(span.start_line, 4);
    }

    #[test]
    fn falls_back_to_line_numbers() {
        let span = located_span(BODY, &answer(Some("memcpy(name, buf, 64);"), Some((3, 4)))).unwrap();
        assert_eq!(&BODY[span.start..span.end], "char name[8];\n    strcpy(name, buf);");

        let err = located_span(BODY, &answer(None, Some((10, 12)))).unwrap_err();
        assert!(err.contains("outside the function"));
        let err = located_span(BODY, &answer(Some("gets(buf);"), None)).unwrap_err();
        assert!(err.contains("not a verbatim substring"));
    }

    #[tokio::test]
    async fn unlocatable_answer_is_invalid() {
        let (outcome, oracle) = explain_with("```c\ngets(buf);\n```", EXPLANATION).await;
        let RecordOutcome::Invalid { reason, raw } = outcome else {
            panic!("expected invalid, got {outcome:?}");
        };
        assert!(reason.contains("verbatim"), "{reason}");
        assert!(raw.contains("gets(buf);"));
        assert_eq!(oracle.calls_for(OracleTask::Explain), 0);

        let (outcome, _) = explain_with("Line Numbers: [7-9]", EXPLANATION).await;
        assert!(matches!(outcome, RecordOutcome::Invalid { ref reason, .. } if reason.contains("outside")));

        let (outcome, _) = explain_with("Somewhere in the copy.", EXPLANATION).await;
        assert!(matches!(outcome, RecordOutcome::Invalid { .. }));
    }

    #[tokio::test]
    async fn explanation_without_impact_is_invalid() {
        let (outcome, oracle) = explain_with(
            "```c\nstrcpy(buf, s);\n```",
            "Root Cause: strcpy copies s into buf without a length check.",
        )
        .await;
        let RecordOutcome::Invalid { reason, raw } = outcome else {
            panic!("expected invalid, got {outcome:?}");
        };
        assert!(reason.contains("impact"), "{reason}");
        assert!(raw.starts_with("Root Cause:"));
        assert_eq!(oracle.calls_for(OracleTask::Explain), 1);
    }

    #[tokio::test]
    async fn agreement_compares_mask_with_located_lines() {
        let record = resolved();
        let mask = record.masked.masked.span;

        let (outcome, _) = explain_with("Line Numbers: [2-3]", EXPLANATION).await;
        let RecordOutcome::Kept(explained) = outcome else {
            panic!("expected kept, got {outcome:?}");
        };
        let explanation = &explained.explanation;
        assert_eq!(explanation.located_text, "{\n    strcpy(buf, s);");
        assert_eq!(explanation.located_span.start_line, 2);
        assert_eq!(explanation.agreement, SpanAgreement::between(&mask, &explanation.located_span));
        assert!(!explanation.agreement.exact);
        assert!(explanation.agreement.located_covers_mask);
        assert!(explanation.agreement.overlap < 1.0);
        assert_eq!(explanation.impact, "Stack memory past buf is overwritten.");

        let (outcome, _) = explain_with("```c\nstrcpy(buf, s);\n```", EXPLANATION).await;
        let RecordOutcome::Kept(explained) = outcome else {
            panic!("expected kept, got {outcome:?}");
        };
        assert!(explained.explanation.agreement.exact);
    }
}
