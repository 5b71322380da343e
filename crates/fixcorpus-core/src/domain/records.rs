//! Stage records.
//!
//! Every stage output wraps its input record and adds one annotation, so a
//! downstream record always carries everything upstream stages produced.

use serde::{Deserialize, Serialize};

use super::commit::{Commit, RecordKey};

/// Oracle verdict on whether a commit fixes a vulnerability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityVerdict {
    ConfirmedFix,
    NotAFix,
    Undetermined,
}

impl SecurityVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityVerdict::ConfirmedFix => "confirmed_fix",
            SecurityVerdict::NotAFix => "not_a_fix",
            SecurityVerdict::Undetermined => "undetermined",
        }
    }
}

impl std::fmt::Display for SecurityVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// S0b output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriagedCommit {
    pub commit: Commit,
    pub verdict: SecurityVerdict,
    /// Raw classification response, kept for audit
    pub oracle_response: String,
}

/// Byte span `[start, end)` into a function body, with its 1-based line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub start_line: u32,
    pub end_line: u32,
}

impl Span {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Full contents of the changed file at the parent and at the commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    pub before: String,
    pub after: String,
}

/// Inclusive, 1-based line range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// The changed function before and after the fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionPair {
    pub name: String,
    pub signature: String,
    pub before_body: String,
    pub after_body: String,
    pub before_lines: LineRange,
    pub after_lines: LineRange,
    pub commit: RecordKey,
}

/// S1 output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinedCommit {
    pub triaged: TriagedCommit,
    pub snapshot: FileSnapshot,
    pub pair: FunctionPair,
}

impl RefinedCommit {
    pub fn commit(&self) -> &Commit {
        &self.triaged.commit
    }
}

/// The before-body with exactly one span replaced by a placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedFunction {
    pub masked_body: String,
    /// Placeholder token, e.g. `<MASK_1>`
    pub placeholder: String,
    pub sequence: u32,
    /// The replaced text, sliced from the original body
    pub ground_truth: String,
    /// Where the ground truth sat in the original body
    pub span: Span,
}

impl MaskedFunction {
    /// Replace `span` of `body` with `<{prefix}_{sequence}>`.
    pub fn apply(body: &str, span: Span, prefix: &str, sequence: u32) -> Option<Self> {
        let ground_truth = body.get(span.start..span.end)?;
        let placeholder = format!("<{prefix}_{sequence}>");
        let masked_body = format!("{}{}{}", &body[..span.start], placeholder, &body[span.end..]);
        Some(Self {
            masked_body,
            placeholder,
            sequence,
            ground_truth: ground_truth.to_string(),
            span,
        })
    }

    /// Substitute the ground truth back into the placeholder.
    pub fn unmask(&self) -> String {
        self.masked_body
            .replacen(&self.placeholder, &self.ground_truth, 1)
    }

    pub fn placeholder_count(&self) -> usize {
        self.masked_body.matches(&self.placeholder).count()
    }
}

/// S2a output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedRecord {
    pub refined: RefinedCommit,
    pub masked: MaskedFunction,
    pub oracle_response: String,
}

impl MaskedRecord {
    pub fn pair(&self) -> &FunctionPair {
        &self.refined.pair
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Function,
    Variable,
    Pointer,
    Structure,
    Constant,
    Macro,
    Other,
}

impl ElementKind {
    /// Classify a free-text kind description such as `pointer to struct`.
    pub fn from_description(desc: &str) -> Self {
        let d = desc.to_lowercase();
        if d.contains("macro") {
            ElementKind::Macro
        } else if d.contains("pointer") {
            ElementKind::Pointer
        } else if d.contains("function") || d.contains("method") {
            ElementKind::Function
        } else if ["struct", "class", "union", "enum", "type"]
            .iter()
            .any(|k| d.contains(k))
        {
            ElementKind::Structure
        } else if d.contains("const") {
            ElementKind::Constant
        } else if ["variable", "parameter", "argument", "global", "field"]
            .iter()
            .any(|k| d.contains(k))
        {
            ElementKind::Variable
        } else {
            ElementKind::Other
        }
    }
}

/// Which function body a usage was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Before,
    After,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UsageSite {
    pub side: Side,
    /// Byte offset of the first whole-word occurrence
    pub offset: usize,
}

/// Where an element is defined in the file snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionSite {
    pub path: String,
    pub side: Side,
    pub line: u32,
    pub text: String,
}

/// A symbol used near the mask but not defined in the function body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndefinedElement {
    pub name: String,
    pub kind: ElementKind,
    pub usage: UsageSite,
    pub definition: Option<DefinitionSite>,
}

/// S2b output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub masked: MaskedRecord,
    pub elements: Vec<UndefinedElement>,
    pub extract_response: String,
    pub resolve_response: Option<String>,
}

/// How an independently located span compares with the diff-derived one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpanAgreement {
    pub exact: bool,
    /// Intersection over union of the two byte ranges, `0.0..=1.0`
    pub overlap: f64,
    pub located_covers_mask: bool,
}

impl SpanAgreement {
    pub fn between(mask: &Span, located: &Span) -> Self {
        let inter_start = mask.start.max(located.start);
        let inter_end = mask.end.min(located.end);
        let inter = inter_end.saturating_sub(inter_start);
        let union = mask.end.max(located.end) - mask.start.min(located.start);
        let overlap = if union == 0 {
            0.0
        } else {
            inter as f64 / union as f64
        };
        Self {
            exact: mask.start == located.start && mask.end == located.end,
            overlap,
            located_covers_mask: located.start <= mask.start && located.end >= mask.end,
        }
    }
}

/// Localization and explanation produced in S3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnerabilityExplanation {
    pub located_span: Span,
    pub located_text: String,
    pub agreement: SpanAgreement,
    pub root_cause: String,
    pub impact: String,
    pub locate_response: String,
    pub explain_response: String,
}

/// S3 output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainedRecord {
    pub resolved: ResolvedRecord,
    pub explanation: VulnerabilityExplanation,
}

impl ExplainedRecord {
    pub fn masked(&self) -> &MaskedRecord {
        &self.resolved.masked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(start: usize, end: usize) -> Span {
        Span {
            start,
            end,
            start_line: 1,
            end_line: 1,
        }
    }

    #[test]
    fn mask_and_unmask_round_trip() {
        let body = "int f(char *s) {\n    strcpy(buf, s);\n    return 0;\n}\n";
        let start = body.find("strcpy").unwrap();
        let end = start + "strcpy(buf, s);".len();
        let masked = MaskedFunction::apply(body, span(start, end), "MASK", 1).unwrap();

        assert_eq!(masked.placeholder, "<MASK_1>");
        assert_eq!(masked.ground_truth, "strcpy(buf, s);");
        assert!(masked.masked_body.contains("    <MASK_1>\n"));
        assert_eq!(masked.placeholder_count(), 1);
        assert_eq!(masked.unmask(), body);
    }

    #[test]
    fn apply_rejects_out_of_bounds_span() {
        assert!(MaskedFunction::apply("abc", span(1, 10), "MASK", 1).is_none());
    }

    #[test]
    fn agreement_metrics() {
        let same = SpanAgreement::between(&span(10, 20), &span(10, 20));
        assert!(same.exact);
        assert_eq!(same.overlap, 1.0);
        assert!(same.located_covers_mask);

        let wider = SpanAgreement::between(&span(10, 20), &span(0, 40));
        assert!(!wider.exact);
        assert!(wider.located_covers_mask);
        assert_eq!(wider.overlap, 0.25);

        let disjoint = SpanAgreement::between(&span(0, 5), &span(10, 20));
        assert_eq!(disjoint.overlap, 0.0);
        assert!(!disjoint.located_covers_mask);
    }

    #[test]
    fn element_kind_from_description() {
        assert_eq!(ElementKind::from_description("pointer to struct"), ElementKind::Pointer);
        assert_eq!(ElementKind::from_description("Function"), ElementKind::Function);
        assert_eq!(ElementKind::from_description("struct type"), ElementKind::Structure);
        assert_eq!(ElementKind::from_description("global variable"), ElementKind::Variable);
        assert_eq!(ElementKind::from_description("macro constant"), ElementKind::Macro);
        assert_eq!(ElementKind::from_description("constant"), ElementKind::Constant);
        assert_eq!(ElementKind::from_description("???"), ElementKind::Other);
    }

    #[test]
    fn verdict_serializes_snake_case() {
        let json = serde_json::to_string(&SecurityVerdict::NotAFix).unwrap();
        assert_eq!(json, "\"not_a_fix\"");
        assert_eq!(SecurityVerdict::ConfirmedFix.to_string(), "confirmed_fix");
    }
}
