//! S2b: extract identifiers around the mask and resolve their definitions.
//!
//! Unparseable extraction or resolution answers degrade the annotation
//! (empty element set, or elements without definitions) instead of
//! failing the record. A record left with no element at all is rejected
//! unless `drop_without_elements` is off.

use std::sync::Arc;

use async_trait::async_trait;
use fixcorpus_oracle::Oracle;

use super::{RecordOutcome, Rejection, Stage, StageProcessor};
use crate::config::ResolverConfig;
use crate::domain::{
    ElementKind, FileSnapshot, FunctionPair, MaskedRecord, ResolvedRecord, UndefinedElement,
};
use crate::elements::{
    context_window, find_definition, first_usage, fix_window, is_locally_defined, is_member,
    verify_hint, ElementPolicy,
};
use crate::error::PipelineResult;
use crate::prompts;
use crate::response::{parse_extracted_elements, parse_resolution, ExtractedElement, ResolvedEntry};

pub struct ResolveProcessor {
    oracle: Arc<dyn Oracle>,
    policy: ElementPolicy,
    context_lines: usize,
    drop_without_elements: bool,
}

impl ResolveProcessor {
    pub fn new(oracle: Arc<dyn Oracle>, config: &ResolverConfig) -> PipelineResult<Self> {
        Ok(Self {
            oracle,
            policy: ElementPolicy::from_config(config)?,
            context_lines: config.context_lines,
            drop_without_elements: config.drop_without_elements,
        })
    }

    /// Why an extracted identifier is dropped, or `None` to keep it.
    fn screen(&self, pair: &FunctionPair, element: &ExtractedElement) -> Option<&'static str> {
        let name = element.name.as_str();
        if is_member(name, &element.description) {
            return Some("member access");
        }
        if let Some(reason) = self.policy.rejection(name) {
            return Some(reason);
        }
        if is_locally_defined(&pair.before_body, name) {
            return Some("defined locally");
        }
        if first_usage(&pair.before_body, &pair.after_body, name).is_none() {
            return Some("not present in the function");
        }
        None
    }

    /// Keep plausible identifiers and attach kinds, usage and definitions.
    pub fn validate(
        &self,
        key: &str,
        pair: &FunctionPair,
        snapshot: &FileSnapshot,
        extracted: &[ExtractedElement],
        resolved: &[ResolvedEntry],
    ) -> Vec<UndefinedElement> {
        let mut out: Vec<UndefinedElement> = Vec::new();
        for element in extracted {
            if let Some(reason) = self.screen(pair, element) {
                tracing::debug!(record = %key, element = %element.name, reason, "dropping element");
                continue;
            }
            let Some(usage) = first_usage(&pair.before_body, &pair.after_body, &element.name) else {
                continue;
            };

            let described = ElementKind::from_description(&element.description);
            let entry = resolved.iter().find(|e| e.name == element.name);
            let kind = match entry {
                Some(e)
                    if !matches!(
                        described,
                        ElementKind::Pointer | ElementKind::Constant | ElementKind::Macro
                    ) =>
                {
                    e.kind
                }
                _ => described,
            };

            let definition = entry
                .and_then(|e| e.definition.as_deref())
                .and_then(|hint| verify_hint(snapshot, &element.name, hint))
                .or_else(|| {
                    find_definition(
                        snapshot,
                        &element.name,
                        kind,
                        (&pair.before_lines, &pair.after_lines),
                    )
                });

            if !out.iter().any(|e| e.name == element.name) {
                out.push(UndefinedElement {
                    name: element.name.clone(),
                    kind,
                    usage,
                    definition,
                });
            }
        }
        out.sort_by(|a, b| (a.usage, &a.name).cmp(&(b.usage, &b.name)));
        out
    }
}

#[async_trait]
impl StageProcessor for ResolveProcessor {
    type Input = MaskedRecord;
    type Output = ResolvedRecord;

    fn stage(&self) -> Stage {
        Stage::Resolve
    }

    async fn process(&self, key: &str, record: MaskedRecord) -> RecordOutcome<ResolvedRecord> {
        let pair = record.pair();
        let snapshot = &record.refined.snapshot;

        let before = context_window(&pair.before_body, &record.masked.span, self.context_lines);
        let after = fix_window(&pair.before_body, &pair.after_body, self.context_lines);
        let extract_response = match self.oracle.extract(prompts::extract(&before, &after)).await {
            Ok(text) => text,
            Err(err) => return RecordOutcome::failed(&err),
        };
        let extracted: Vec<ExtractedElement> = match parse_extracted_elements(&extract_response) {
            Ok(list) => list
                .into_iter()
                .filter(|e| self.screen(pair, e).is_none())
                .collect(),
            Err(err) => {
                tracing::warn!(
                    event = "record.invalid",
                    stage = %Stage::Resolve,
                    record = %key,
                    reason = %err,
                    raw = %extract_response,
                    "extraction unparseable, keeping record without elements"
                );
                Vec::new()
            }
        };

        let (resolve_response, resolved) = if extracted.is_empty() {
            (None, Vec::new())
        } else {
            let prompt = prompts::resolve(&extracted, pair, snapshot);
            let text = match self.oracle.resolve(prompt).await {
                Ok(text) => text,
                Err(err) => return RecordOutcome::failed(&err),
            };
            let entries = parse_resolution(&text).unwrap_or_else(|err| {
                tracing::warn!(
                    event = "record.invalid",
                    stage = %Stage::Resolve,
                    record = %key,
                    reason = %err,
                    raw = %text,
                    "resolution unparseable, keeping elements without definitions"
                );
                Vec::new()
            });
            (Some(text), entries)
        };

        let elements = self.validate(key, pair, snapshot, &extracted, &resolved);
        if elements.is_empty() && self.drop_without_elements {
            return RecordOutcome::Rejected(Rejection::NoUndefinedElements);
        }
        RecordOutcome::Kept(ResolvedRecord {
            masked: record,
            elements,
            extract_response,
            resolve_response,
        })
    }
}
