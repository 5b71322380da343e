//! Function extents in C/C++ sources via a brace scanner.
//!
//! The scanner works on a scrubbed copy of the file (comments, literal
//! contents and preprocessor directives blanked, byte offsets preserved)
//! and classifies each top-level `{` by the header text preceding it.
//! `namespace` and `extern "C"` blocks are transparent, and aggregate
//! bodies are searched for inline member functions.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::span::LineIndex;
use super::tokenizer::{blank, normalize_whitespace, strip_comments, Lex};

static TRANSPARENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:(?:inline\s+)?namespace\b[\w:\s]*|extern\s*"\s*")$"#).expect("valid regex")
});

static AGGREGATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:typedef\s+)?(?:template\s*<[^>]*>\s*)?(?:struct|class|union|enum)\b[^()=]*$")
        .expect("valid regex")
});

static ACCESS_SPECIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:(?:public|private|protected)\s*:\s*)+").expect("valid regex"));

static ENDS_WITH_PARAMS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\)(?:\s*(?:\b(?:const|noexcept|override|final|volatile)\b|&&|&))*$")
        .expect("valid regex")
});

const NOT_FUNCTIONS: &[&str] = &[
    "if", "else", "for", "while", "switch", "do", "return", "case", "catch", "try", "sizeof",
];

const NOT_PARAM_LISTS: &[&str] = &["__attribute__", "__declspec", "throw", "noexcept", "alignas"];

/// A function definition located in a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionExtent {
    /// Possibly qualified name (`Parser::feed`)
    pub name: String,
    /// Header with whitespace normalized
    pub signature: String,
    /// Byte offset of the first header character
    pub start: usize,
    /// Byte offset one past the closing brace
    pub end: usize,
    pub start_line: u32,
    pub end_line: u32,
}

impl FunctionExtent {
    pub fn contains_line(&self, line: u32) -> bool {
        line >= self.start_line && line <= self.end_line
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

enum Block {
    Transparent,
    Aggregate,
    Function {
        name: String,
        signature: String,
        start: usize,
    },
    Other,
}

/// Blank comments, literal contents and preprocessor lines, keeping byte
/// offsets and newlines intact.
pub fn scrub(source: &str) -> String {
    let stripped = strip_comments(source);
    let mut out = String::with_capacity(stripped.len());
    let mut state = Lex::Code;
    let mut at_line_start = true;
    let mut in_directive = false;
    let mut chars = stripped.chars().peekable();

    while let Some(c) = chars.next() {
        if in_directive {
            if c == '\\' && chars.peek() == Some(&'\n') {
                chars.next();
                out.push_str(" \n");
            } else if c == '\n' {
                in_directive = false;
                at_line_start = true;
                out.push('\n');
            } else {
                blank(&mut out, c);
            }
            continue;
        }

        if state == Lex::Code {
            match c {
                '#' if at_line_start => {
                    in_directive = true;
                    out.push(' ');
                    continue;
                }
                '"' => state = Lex::Str,
                '\'' => state = Lex::Char,
                _ => {}
            }
            if c == '\n' {
                at_line_start = true;
            } else if !c.is_whitespace() {
                at_line_start = false;
            }
            out.push(c);
        } else if c == '\\' {
            blank(&mut out, c);
            if let Some(next) = chars.next() {
                blank(&mut out, next);
            }
        } else if (state == Lex::Str && c == '"') || (state == Lex::Char && c == '\'') {
            out.push(c);
            state = Lex::Code;
        } else if c == '\n' {
            out.push('\n');
            state = Lex::Code;
            at_line_start = true;
        } else {
            blank(&mut out, c);
        }
    }
    out
}

/// Name of the function declared by `header`, if it declares one.
fn function_name(header: &str) -> Option<String> {
    if !ENDS_WITH_PARAMS.is_match(header) {
        return None;
    }

    // Cut a constructor initializer list at the first single `:` after `)`.
    let bytes = header.as_bytes();
    let mut depth = 0i32;
    let mut seen_group = false;
    let mut head_end = header.len();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    seen_group = true;
                }
            }
            b':' if depth == 0 && seen_group => {
                let prev = i.checked_sub(1).map(|j| bytes[j]);
                let next = bytes.get(i + 1).copied();
                if prev != Some(b':') && next != Some(b':') {
                    head_end = i;
                    break;
                }
            }
            _ => {}
        }
    }
    let head = &header[..head_end];

    // The parameter list is the last top-level group not owned by an attribute.
    let mut depth = 0i32;
    let mut best = None;
    for (i, b) in head.bytes().enumerate() {
        match b {
            b'(' => {
                if depth == 0 {
                    let ident = trailing_identifier(&head[..i]);
                    if !ident.is_empty() && !NOT_PARAM_LISTS.contains(&ident) {
                        best = Some(ident);
                    }
                }
                depth += 1;
            }
            b')' => depth -= 1,
            b'=' if depth == 0 => return None,
            _ => {}
        }
    }

    let name = best?;
    let last_segment = name.rsplit("::").next().unwrap_or(name);
    if last_segment.is_empty() || NOT_FUNCTIONS.contains(&last_segment) {
        return None;
    }
    Some(name.to_string())
}

fn trailing_identifier(text: &str) -> &str {
    let trimmed = text.trim_end();
    let start = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_alphanumeric() || matches!(c, '_' | ':' | '~'))
        .last()
        .map(|(i, _)| i)
        .unwrap_or(trimmed.len());
    trimmed[start..].trim_start_matches(':')
}

fn classify(clean: &str, from: usize, to: usize) -> Block {
    let raw = &clean[from..to];
    let lead = raw.len() - raw.trim_start().len();
    let mut header = raw.trim();
    let mut start = from + lead;

    if let Some(m) = ACCESS_SPECIFIER.find(header) {
        start += m.end();
        header = &header[m.end()..];
    }
    if header.is_empty() {
        return Block::Other;
    }

    let flat = normalize_whitespace(header);
    if TRANSPARENT.is_match(&flat) {
        return Block::Transparent;
    }
    if AGGREGATE.is_match(&flat) {
        return Block::Aggregate;
    }
    match function_name(&flat) {
        Some(name) => Block::Function {
            name,
            signature: flat,
            start,
        },
        None => Block::Other,
    }
}

/// All function definitions in `source`, in order of their closing brace.
pub fn function_extents(source: &str) -> Vec<FunctionExtent> {
    let clean = scrub(source);
    let index = LineIndex::new(source);
    let mut stack: Vec<Block> = Vec::new();
    let mut header_start = 0;
    let mut extents = Vec::new();

    for (i, b) in clean.bytes().enumerate() {
        match b {
            b'{' => {
                let at_scope = stack
                    .iter()
                    .all(|blk| matches!(blk, Block::Transparent | Block::Aggregate));
                let block = if at_scope {
                    classify(&clean, header_start, i)
                } else {
                    Block::Other
                };
                stack.push(block);
                header_start = i + 1;
            }
            b'}' => {
                if let Some(Block::Function {
                    name,
                    signature,
                    start,
                }) = stack.pop()
                {
                    extents.push(FunctionExtent {
                        name,
                        signature,
                        start,
                        end: i + 1,
                        start_line: index.line_of(start),
                        end_line: index.line_of(i),
                    });
                }
                header_start = i + 1;
            }
            b';' => header_start = i + 1,
            _ => {}
        }
    }
    extents
}

/// The innermost function whose lines contain `line`.
pub fn enclosing_function(extents: &[FunctionExtent], line: u32) -> Option<&FunctionExtent> {
    extents
        .iter()
        .filter(|e| e.contains_line(line))
        .min_by_key(|e| e.end_line - e.start_line)
}

/// First function definition named `name` (exact or as last `::` segment).
pub fn find_function<'a>(extents: &'a [FunctionExtent], name: &str) -> Option<&'a FunctionExtent> {
    extents.iter().find(|e| {
        e.name == name || e.name.rsplit("::").next() == Some(name)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"#include <string.h>
#define BRACE "{"

/* helper { not a block */
static int helper(int x)
{
    if (x > 0) {
        return x;
    }
    return '}';
}

struct header {
    char name[16];
};

static const char *names[] = { "a", "b" };

int parse_header(char *buf,
                 size_t len)
{
    struct header h;
    strcpy(h.name, buf);
    return 0;
}
"#;

    #[test]
    fn finds_top_level_functions_only() {
        let extents = function_extents(SOURCE);
        let names: Vec<&str> = extents.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["helper", "parse_header"]);

        let helper = &extents[0];
        assert_eq!(helper.start_line, 5);
        assert_eq!(helper.end_line, 11);
        assert!(helper.text(SOURCE).starts_with("static int helper(int x)"));
        assert!(helper.text(SOURCE).ends_with('}'));

        let parse = &extents[1];
        assert_eq!(parse.signature, "int parse_header(char *buf, size_t len)");
        assert_eq!(parse.start_line, 19);
        assert_eq!(parse.end_line, 25);
    }

    #[test]
    fn enclosing_and_lookup() {
        let extents = function_extents(SOURCE);
        assert_eq!(enclosing_function(&extents, 23).unwrap().name, "parse_header");
        assert!(enclosing_function(&extents, 14).is_none());
        assert!(find_function(&extents, "helper").is_some());
        assert!(find_function(&extents, "missing").is_none());
    }

    #[test]
    fn namespaces_extern_c_and_methods() {
        let source = r#"extern "C" {
namespace net {
class Parser : public Base {
public:
    Parser() : pos_(0), len_(0) {}
    int feed(const char *p) const { return *p; }
private:
    int pos_;
};
int Parser::reset(void) noexcept
{
    return 0;
}
}
}
"#;
        let extents = function_extents(source);
        let names: Vec<&str> = extents.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Parser", "feed", "Parser::reset"]);
        assert!(find_function(&extents, "reset").is_some());
    }

    #[test]
    fn attribute_groups_are_not_parameter_lists() {
        let source = "static void __attribute__((noreturn)) die(const char *msg) __attribute__((cold))\n{\n    abort();\n}\n";
        let extents = function_extents(source);
        assert_eq!(extents.len(), 1);
        assert_eq!(extents[0].name, "die");
    }

    #[test]
    fn scrub_preserves_length_and_lines() {
        let clean = scrub(SOURCE);
        assert_eq!(clean.len(), SOURCE.len());
        assert_eq!(clean.lines().count(), SOURCE.lines().count());
        assert!(!clean.contains("include"));
        assert!(!clean.contains("not a block"));
    }
}
