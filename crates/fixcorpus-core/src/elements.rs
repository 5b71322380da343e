//! Undefined-element validation and definition lookup.
//!
//! The oracle proposes identifiers; everything here decides which of them
//! survive and where they are defined, using only the function pair and
//! its file snapshot.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::code::{function_extents, find_function, scrub, strip_comments, LineIndex};
use crate::config::ResolverConfig;
use crate::domain::{DefinitionSite, ElementKind, FileSnapshot, LineRange, Side, Span, UsageSite};
use crate::error::{PipelineError, PipelineResult};

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "bool", "true", "false", "nullptr",
    "class", "namespace", "template", "this", "new", "delete", "public", "private",
    "protected", "virtual", "operator", "try", "catch", "throw", "using",
];

/// Words that can precede an identifier without declaring it.
const NOT_TYPES: &[&str] = &[
    "return", "sizeof", "else", "case", "goto", "delete", "throw", "new", "typedef", "do",
];

static DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)(?:^|[(,;{])\s*(?:(?:const|static|unsigned|signed|struct|enum|union|volatile|register|long|short|extern)\s+)*([A-Za-z_][A-Za-z0-9_:]*)\s*(?:<[^<>;]*>)?(?:\s+|\s*[*&]+\s*)(?:\*\s*)*([A-Za-z_][A-Za-z0-9_]*)\b",
    )
    .expect("valid regex")
});

/// `(type, name)` pairs of declarations in comment-free code.
fn declarations(clean: &str) -> impl Iterator<Item = (&str, regex::Match<'_>)> + '_ {
    DECLARATION.captures_iter(clean).filter_map(move |caps| {
        let ty = caps.get(1)?.as_str();
        let name = caps.get(2)?;
        let rest = clean[name.end()..].trim_start_matches([' ', '\t']);
        let terminated =
            rest.is_empty() || rest.starts_with(['=', ';', ',', '[', ')', '\n', '\r']);
        (terminated && !NOT_TYPES.contains(&ty) && ty != name.as_str()).then_some((ty, name))
    })
}

/// Configurable filter for identifiers too generic to carry a definition.
#[derive(Debug, Clone)]
pub struct ElementPolicy {
    denylist: HashSet<String>,
    patterns: Vec<Regex>,
    min_len: usize,
}

impl ElementPolicy {
    pub fn new<I, S>(denylist: I, patterns: &[String], min_len: usize) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            denylist: denylist.into_iter().map(Into::into).collect(),
            patterns,
            min_len,
        })
    }

    pub fn from_config(config: &ResolverConfig) -> PipelineResult<Self> {
        Self::new(
            config.denylist.iter().cloned(),
            &config.deny_patterns,
            config.min_name_len,
        )
        .map_err(|e| PipelineError::Config(format!("resolver.deny_patterns: {e}")))
    }

    /// Why `name` is rejected, or `None` if it is kept.
    pub fn rejection(&self, name: &str) -> Option<&'static str> {
        if name.chars().count() < self.min_len {
            Some("too short")
        } else if self.denylist.contains(name) {
            Some("denylisted")
        } else if C_KEYWORDS.contains(&name) {
            Some("keyword")
        } else if self.patterns.iter().any(|p| p.is_match(name)) {
            Some("denied pattern")
        } else {
            None
        }
    }

    pub fn accepts(&self, name: &str) -> bool {
        self.rejection(name).is_none()
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Byte offset of the first whole-word occurrence of `name` in `text`.
pub fn find_word(text: &str, name: &str) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    let bytes = text.as_bytes();
    text.match_indices(name).map(|(i, _)| i).find(|&i| {
        let before_ok = i == 0 || !is_ident_byte(bytes[i - 1]);
        let end = i + name.len();
        let after_ok = end >= bytes.len() || !is_ident_byte(bytes[end]);
        before_ok && after_ok
    })
}

/// Struct or class member accesses are resolved through their owner.
pub fn is_member(name: &str, description: &str) -> bool {
    let d = description.to_lowercase();
    name.contains('.') || name.contains("->") || d.contains("member") || d.contains("field")
}

/// Whether `body` declares `name` as a local variable or parameter.
pub fn is_locally_defined(body: &str, name: &str) -> bool {
    let clean = strip_comments(body);
    let found = declarations(&clean).any(|(_, ident)| ident.as_str() == name);
    found
}

/// First whole-word occurrence in the before-body, else the after-body.
pub fn first_usage(before: &str, after: &str, name: &str) -> Option<UsageSite> {
    let before_clean = strip_comments(before);
    if let Some(offset) = find_word(&before_clean, name) {
        return Some(UsageSite {
            side: Side::Before,
            offset,
        });
    }
    let after_clean = strip_comments(after);
    find_word(&after_clean, name).map(|offset| UsageSite {
        side: Side::After,
        offset,
    })
}

/// The lines of `body` covered by `span`, with `context` lines either side.
pub fn context_window(body: &str, span: &Span, context: usize) -> String {
    line_window(body, span.start_line, span.end_line, context)
}

/// The lines of `after` that differ from `before`, with `context` lines
/// either side. Empty when the bodies have the same lines.
pub fn fix_window(before: &str, after: &str, context: usize) -> String {
    let old: Vec<&str> = before.lines().collect();
    let new: Vec<&str> = after.lines().collect();
    let prefix = old.iter().zip(&new).take_while(|(a, b)| a == b).count();
    if prefix == old.len() && prefix == new.len() {
        return String::new();
    }
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();
    // A pure deletion leaves no changed line; anchor on the line after the cut.
    let first = prefix + 1;
    let last = (new.len() - suffix).max(first);
    line_window(after, first as u32, last as u32, context)
}

fn line_window(body: &str, first: u32, last: u32, context: usize) -> String {
    let index = LineIndex::new(body);
    let count = index.line_count() as u32;
    if count == 0 {
        return String::new();
    }
    let context = context as u32;
    let first = first.saturating_sub(context).clamp(1, count);
    let last = last.saturating_add(context).clamp(first, count);
    let start = index
        .line_range(body, first)
        .map(|(s, _)| s)
        .unwrap_or(0);
    let end = index
        .line_range(body, last)
        .map(|(_, e)| e)
        .unwrap_or(body.len());
    body[start..end].to_string()
}

fn definition_at(
    path: &str,
    side: Side,
    source: &str,
    index: &LineIndex,
    offset: usize,
) -> DefinitionSite {
    let line = index.line_of(offset);
    let text = index
        .line_range(source, line)
        .map(|(s, e)| source[s..e].trim().to_string())
        .unwrap_or_default();
    DefinitionSite {
        path: path.to_string(),
        side,
        line,
        text,
    }
}

/// Accept an oracle-quoted definition line only if it occurs in the snapshot.
pub fn verify_hint(snapshot: &FileSnapshot, name: &str, hint: &str) -> Option<DefinitionSite> {
    let wanted = hint
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(crate::code::normalize_whitespace)?;
    find_word(&wanted, name)?;

    for (side, source) in [(Side::Before, &snapshot.before), (Side::After, &snapshot.after)] {
        let index = LineIndex::new(source);
        for line in 1..=index.line_count() as u32 {
            let Some((s, e)) = index.line_range(source, line) else {
                continue;
            };
            if crate::code::normalize_whitespace(&source[s..e]).contains(&wanted) {
                return Some(DefinitionSite {
                    path: snapshot.path.clone(),
                    side,
                    line,
                    text: source[s..e].trim().to_string(),
                });
            }
        }
    }
    None
}

/// Definition regexes for one name, compiled once per lookup.
struct DefinitionPatterns {
    macro_def: Regex,
    aggregates: [Regex; 3],
}

impl DefinitionPatterns {
    fn new(name: &str) -> Option<Self> {
        let name = regex::escape(name);
        Some(Self {
            macro_def: Regex::new(&format!(r"(?m)^[ \t]*#[ \t]*define[ \t]+{name}\b")).ok()?,
            aggregates: [
                Regex::new(&format!(r"\b(?:struct|union|enum|class)\s+{name}\s*(?::[^{{;]*)?\{{")).ok()?,
                Regex::new(&format!(r"\btypedef\b[^;]*\b{name}\s*;")).ok()?,
                Regex::new(&format!(r"\}}\s*{name}\s*;")).ok()?,
            ],
        })
    }

    fn macro_definition(&self, clean_raw: &str) -> Option<usize> {
        self.macro_def.find(clean_raw).map(|m| m.start())
    }

    fn aggregate_definition(&self, clean: &str) -> Option<usize> {
        self.aggregates
            .iter()
            .filter_map(|re| re.find(clean).map(|m| m.start()))
            .min()
    }
}

fn global_declaration(clean: &str, name: &str, skip: &[(u32, u32)], index: &LineIndex) -> Option<usize> {
    declarations(clean).find_map(|(_, ident)| {
        if ident.as_str() != name {
            return None;
        }
        let line = index.line_of(ident.start());
        if skip.iter().any(|(a, b)| line >= *a && line <= *b) {
            return None;
        }
        Some(ident.start())
    })
}

/// Search the snapshot for a definition of `name` outside the function
/// occupying `own` lines on each side.
pub fn find_definition(
    snapshot: &FileSnapshot,
    name: &str,
    kind: ElementKind,
    own: (&LineRange, &LineRange),
) -> Option<DefinitionSite> {
    let patterns = DefinitionPatterns::new(name)?;
    for (side, source, own_lines) in [
        (Side::Before, &snapshot.before, own.0),
        (Side::After, &snapshot.after, own.1),
    ] {
        if source.is_empty() {
            continue;
        }
        let index = LineIndex::new(source);
        let clean = scrub(source);
        let comments_only = strip_comments(source);
        let extents = function_extents(source);

        let function = || {
            find_function(&extents, name)
                .filter(|e| !(e.start_line == own_lines.start && e.end_line == own_lines.end))
                .map(|e| e.start)
        };
        let aggregate = || patterns.aggregate_definition(&clean);
        let macro_def = || patterns.macro_definition(&comments_only);
        let global = || {
            let skip: Vec<(u32, u32)> = extents.iter().map(|e| (e.start_line, e.end_line)).collect();
            global_declaration(&clean, name, &skip, &index)
        };

        let offset = match kind {
            ElementKind::Function => function().or_else(macro_def),
            ElementKind::Macro | ElementKind::Constant => {
                macro_def().or_else(global).or_else(aggregate)
            }
            ElementKind::Structure => aggregate().or_else(macro_def),
            _ => global()
                .or_else(macro_def)
                .or_else(aggregate)
                .or_else(function),
        };
        if let Some(offset) = offset {
            return Some(definition_at(&snapshot.path, side, source, &index, offset));
        }
    }
    None
}
