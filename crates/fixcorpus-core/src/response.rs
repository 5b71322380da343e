//! Parsers that impose structure on free-text oracle responses.
//!
//! Every parser is total: malformed input yields a [`ResponseError`], never
//! a panic. Callers decide whether an error drops the record or only the
//! affected annotation.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{ElementKind, Explanation, SecurityVerdict};

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("valid regex"));

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z]+").expect("valid regex"));

static SECTION_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(functions?|variables?|structures?|structs?|types?|macros?|constants?|pointers?)\s*:?$")
        .expect("valid regex")
});

static ELEMENT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([A-Za-z_][A-Za-z0-9_]*(?:(?:::|->|\.)[A-Za-z_][A-Za-z0-9_]*)*)(?:\(\))?\s*(?:\(([^)]*)\)|[:\-]\s*(.+))?$",
    )
    .expect("valid regex")
});

static LIST_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(functions|variables|structures)\s*=\s*\[").expect("valid regex")
});

static LINE_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bline\s*(?:numbers?|range)?\s*:?\s*\[?\s*(\d+)\s*(?:(?:-|–|~|to)\s*(\d+))?\s*\]?")
        .expect("valid regex")
});

static EXPLANATION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[\s#>*\-]*(root\s*cause|impact)\s*\**\s*:\s*\**").expect("valid regex")
});

/// Why a response could not be given structure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    #[error("response is empty")]
    Empty,

    #[error("response contains {count} code blocks, expected one")]
    MultipleBlocks { count: usize },

    #[error("no element could be parsed from the response")]
    NoElements,

    #[error("malformed list: {0}")]
    MalformedList(String),

    #[error("response names neither a snippet nor a line range")]
    NoLocation,

    #[error("response lacks a non-empty {0} field")]
    MissingField(&'static str),
}

/// Contents of every fenced code block, in order.
pub fn fenced_blocks(text: &str) -> Vec<String> {
    FENCE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Normalize a classification answer.
///
/// A "yes" anywhere in the response confirms the fix. Whole words are
/// matched, so "cannot" and "know" never read as "no".
pub fn parse_verdict(text: &str) -> SecurityVerdict {
    let lower = text.to_lowercase();
    let words: Vec<&str> = WORD.find_iter(&lower).map(|m| m.as_str()).collect();
    let has = |w: &str| words.contains(&w);

    if has("yes") {
        SecurityVerdict::ConfirmedFix
    } else if ["cannot", "undetermined", "unsure", "decide", "undecided"]
        .iter()
        .any(|w| has(*w))
    {
        SecurityVerdict::Undetermined
    } else if has("no") {
        SecurityVerdict::NotAFix
    } else {
        SecurityVerdict::Undetermined
    }
}

/// The single span the mask task answered with.
///
/// One fenced block is the span; no block means the trimmed text is.
pub fn parse_mask_span(text: &str) -> Result<String, ResponseError> {
    let blocks = fenced_blocks(text);
    let span = match blocks.len() {
        0 => text.trim().to_string(),
        1 => blocks[0].clone(),
        count => return Err(ResponseError::MultipleBlocks { count }),
    };
    if span.trim().is_empty() {
        return Err(ResponseError::Empty);
    }
    Ok(span)
}

/// One identifier from the extraction task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedElement {
    pub name: String,
    pub description: String,
}

fn strip_list_decoration(line: &str) -> String {
    let line = line.trim();
    let line = line.trim_start_matches(|c: char| matches!(c, '-' | '*' | '•' | '+'));
    let line = match line.find(|c: char| !c.is_ascii_digit()) {
        Some(i) if i > 0 && matches!(line.as_bytes()[i], b'.' | b')') => &line[i + 1..],
        _ => line,
    };
    line.replace('`', "").trim().to_string()
}

/// Parse `name (kind description)` lines.
///
/// Bullets, numbering and backticks are tolerated, as are grouped lists
/// under `Functions:` / `Variables:` style headers.
pub fn parse_extracted_elements(text: &str) -> Result<Vec<ExtractedElement>, ResponseError> {
    if text.trim().is_empty() {
        return Err(ResponseError::Empty);
    }
    let mut section = String::new();
    let mut out: Vec<ExtractedElement> = Vec::new();

    for raw in text.lines() {
        if raw.trim_start().starts_with("```") {
            continue;
        }
        let line = strip_list_decoration(raw);
        let line = line.as_str();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = SECTION_HEADER.captures(line) {
            section = caps[1].to_lowercase();
            continue;
        }
        let Some(caps) = ELEMENT_LINE.captures(line) else {
            continue;
        };
        let name = caps[1].to_string();
        let description = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str().trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| section.clone());
        if !out.iter().any(|e| e.name == name) {
            out.push(ExtractedElement { name, description });
        }
    }

    if out.is_empty() {
        return Err(ResponseError::NoElements);
    }
    Ok(out)
}

/// One identifier from the resolution task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub name: String,
    pub kind: ElementKind,
    /// Definition line as quoted by the oracle, unverified
    pub definition: Option<String>,
}

/// Split at top-level commas, ignoring commas inside brackets or quotes.
fn split_items(list: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth -= 1,
            (None, ',') if depth <= 0 => {
                items.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(&list[start..]);
    items
}

fn parse_item(item: &str, kind: ElementKind) -> Option<ResolvedEntry> {
    let item = item.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '`').trim();
    if item.is_empty() {
        return None;
    }
    let (name, definition) = match item.split_once(':') {
        Some((n, d)) if !n.contains('(') && !n.trim().is_empty() && !d.starts_with(':') => {
            (n.trim(), Some(d.trim().trim_matches('`').to_string()))
        }
        _ => (item, None),
    };
    let name = name.trim_end_matches("()").trim();
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '.' | '>' | '-'))
    {
        return None;
    }
    Some(ResolvedEntry {
        name: name.to_string(),
        kind,
        definition: definition.filter(|d| !d.is_empty()),
    })
}

/// Parse `Functions = [...]`, `Variables = [...]`, `Structures = [...]`.
pub fn parse_resolution(text: &str) -> Result<Vec<ResolvedEntry>, ResponseError> {
    if text.trim().is_empty() {
        return Err(ResponseError::Empty);
    }
    let mut out = Vec::new();
    let mut found = false;

    for caps in LIST_START.captures_iter(text) {
        let whole = caps.get(0).map(|m| m.end()).unwrap_or(0);
        let kind = match caps[1].to_lowercase().as_str() {
            "functions" => ElementKind::Function,
            "variables" => ElementKind::Variable,
            _ => ElementKind::Structure,
        };

        // Find the bracket closing this list.
        let mut depth = 1i32;
        let mut close = None;
        for (i, c) in text[whole..].char_indices() {
            match c {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(whole + i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let close = close.ok_or_else(|| {
            ResponseError::MalformedList(format!("unterminated {} list", &caps[1]))
        })?;
        found = true;

        for item in split_items(&text[whole..close]) {
            if let Some(entry) = parse_item(item, kind) {
                if !out.iter().any(|e: &ResolvedEntry| e.name == entry.name) {
                    out.push(entry);
                }
            }
        }
    }

    if !found {
        return Err(ResponseError::MalformedList(
            "no Functions/Variables/Structures list".into(),
        ));
    }
    Ok(out)
}

/// Where the locate task placed the vulnerability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocateAnswer {
    pub snippet: Option<String>,
    pub lines: Option<(u32, u32)>,
}

/// Parse a fenced snippet and an optional `Line Numbers: [a-b]`.
pub fn parse_locate(text: &str) -> Result<LocateAnswer, ResponseError> {
    let blocks = fenced_blocks(text);
    let snippet = match blocks.as_slice() {
        [one] if !one.trim().is_empty() => Some(one.clone()),
        _ => None,
    };
    let lines = LINE_RANGE.captures(text).and_then(|c| {
        let first: u32 = c[1].parse().ok()?;
        let last: u32 = match c.get(2) {
            Some(m) => m.as_str().parse().ok()?,
            None => first,
        };
        Some((first, last))
    });
    if snippet.is_none() && lines.is_none() {
        return Err(ResponseError::NoLocation);
    }
    Ok(LocateAnswer { snippet, lines })
}

fn clean_field(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| c == '*' || c == '#')
        .trim()
        .to_string()
}

/// Parse `Root Cause:` and `Impact:` sections.
pub fn parse_explanation(text: &str) -> Result<Explanation, ResponseError> {
    let markers: Vec<(String, usize, usize)> = EXPLANATION_MARKER
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let label = c[1].to_lowercase().replace(char::is_whitespace, "");
            Some((label, whole.start(), whole.end()))
        })
        .collect();

    let field = |label: &str| -> Option<String> {
        let pos = markers.iter().position(|(l, _, _)| l == label)?;
        let (_, _, body_start) = markers[pos];
        let body_end = markers
            .get(pos + 1)
            .map(|(_, start, _)| *start)
            .unwrap_or(text.len());
        let value = clean_field(&text[body_start..body_end]);
        (!value.is_empty()).then_some(value)
    };

    let root_cause = field("rootcause").ok_or(ResponseError::MissingField("root cause"))?;
    let impact = field("impact").ok_or(ResponseError::MissingField("impact"))?;
    Ok(Explanation { root_cause, impact })
}
