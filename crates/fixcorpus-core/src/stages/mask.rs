//! S2a: replace the oracle-identified vulnerable span with a placeholder.

use std::sync::Arc;

use async_trait::async_trait;
use fixcorpus_oracle::Oracle;

use super::{RecordOutcome, Rejection, Stage, StageProcessor};
use crate::code::{find_verbatim, SpanMatch};
use crate::config::MaskConfig;
use crate::domain::{MaskedFunction, MaskedRecord, RefinedCommit};
use crate::prompts;
use crate::response::parse_mask_span;

/// Sequence number of the only placeholder in a record.
const FIRST_SEQUENCE: u32 = 1;

pub struct MaskProcessor {
    oracle: Arc<dyn Oracle>,
    config: MaskConfig,
}

impl MaskProcessor {
    pub fn new(oracle: Arc<dyn Oracle>, config: MaskConfig) -> Self {
        Self { oracle, config }
    }

    /// Validate `response` against `body` and build the masked function.
    pub fn apply_response(&self, body: &str, response: &str) -> Result<MaskedFunction, String> {
        let candidate = parse_mask_span(response).map_err(|e| e.to_string())?;
        let span = match find_verbatim(body, &candidate) {
            SpanMatch::Unique(span) => span,
            SpanMatch::NotFound => return Err("span is not a verbatim substring of the body".into()),
            SpanMatch::Ambiguous(n) => return Err(format!("span occurs {n} times in the body")),
        };
        let masked = MaskedFunction::apply(body, span, &self.config.placeholder_prefix, FIRST_SEQUENCE)
            .ok_or_else(|| "span does not fall on character boundaries".to_string())?;
        if masked.placeholder_count() != 1 || masked.unmask() != body {
            return Err("placeholder substitution does not round-trip".into());
        }
        Ok(masked)
    }
}

#[async_trait]
impl StageProcessor for MaskProcessor {
    type Input = RefinedCommit;
    type Output = MaskedRecord;

    fn stage(&self) -> Stage {
        Stage::Mask
    }

    async fn process(&self, _key: &str, refined: RefinedCommit) -> RecordOutcome<MaskedRecord> {
        let marker = format!("<{}_", self.config.placeholder_prefix);
        if refined.pair.before_body.contains(&marker) {
            return RecordOutcome::Rejected(Rejection::PlaceholderPresent);
        }

        let prompt = prompts::mask(refined.commit(), &refined.pair);
        let response = match self.oracle.mask(prompt).await {
            Ok(text) => text,
            Err(err) => return RecordOutcome::failed(&err),
        };
        match self.apply_response(&refined.pair.before_body, &response) {
            Ok(masked) => RecordOutcome::Kept(MaskedRecord {
                refined,
                masked,
                oracle_response: response,
            }),
            Err(reason) => RecordOutcome::invalid(reason, response),
        }
    }
}
