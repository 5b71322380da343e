//! Fixed lexical tokenizer for size limits and formatting-only detection.
//!
//! Identifiers, integer runs and single punctuation characters each count
//! as one token. The tokenizer is deliberately model-agnostic so that
//! limits are reproducible across runs.

use once_cell::sync::Lazy;
use regex::Regex;

static TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*|[0-9]+|\S").expect("valid token regex"));

/// Split `text` into tokens.
pub fn tokens(text: &str) -> Vec<&str> {
    TOKEN.find_iter(text).map(|m| m.as_str()).collect()
}

pub fn count_tokens(text: &str) -> usize {
    TOKEN.find_iter(text).count()
}

/// Collapse every whitespace run to a single space and trim.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Lexical state shared by the comment stripper and the brace scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Lex {
    Code,
    LineComment,
    BlockComment,
    Str,
    Char,
}

/// Replace comments with spaces, keeping newlines and string literals.
///
/// The output has the same byte length and line structure as the input.
pub fn strip_comments(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut state = Lex::Code;
    let mut chars = code.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Lex::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    out.push_str("  ");
                    state = Lex::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push_str("  ");
                    state = Lex::BlockComment;
                }
                '"' => {
                    out.push(c);
                    state = Lex::Str;
                }
                '\'' => {
                    out.push(c);
                    state = Lex::Char;
                }
                _ => out.push(c),
            },
            Lex::LineComment => {
                if c == '\n' {
                    out.push('\n');
                    state = Lex::Code;
                } else {
                    blank(&mut out, c);
                }
            }
            Lex::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    out.push_str("  ");
                    state = Lex::Code;
                } else {
                    blank(&mut out, c);
                }
            }
            Lex::Str | Lex::Char => {
                out.push(c);
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else if (state == Lex::Str && c == '"')
                    || (state == Lex::Char && c == '\'')
                    || c == '\n'
                {
                    state = Lex::Code;
                }
            }
        }
    }
    out
}

/// Push whitespace of the same byte length as `c`, preserving newlines.
pub(crate) fn blank(out: &mut String, c: char) {
    if c == '\n' {
        out.push('\n');
    } else {
        for _ in 0..c.len_utf8() {
            out.push(' ');
        }
    }
}

/// Whether two code fragments differ only in whitespace or comments.
pub fn same_token_stream(a: &str, b: &str) -> bool {
    let a = strip_comments(a);
    let b = strip_comments(b);
    tokens(&a) == tokens(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_counting() {
        assert_eq!(tokens("if (len > 16) return -1;"), vec![
            "if", "(", "len", ">", "16", ")", "return", "-", "1", ";"
        ]);
        assert_eq!(count_tokens(""), 0);
        assert_eq!(count_tokens("a_b1 += 0x10"), 5);
    }

    #[test]
    fn whitespace_normalization() {
        assert_eq!(normalize_whitespace("  a \n\t b  "), "a b");
    }

    #[test]
    fn comments_are_blanked_but_strings_kept() {
        let code = "x = 1; // note\ny = \"// not a comment\"; /* multi\nline */ z;";
        let stripped = strip_comments(code);
        assert_eq!(stripped.len(), code.len());
        assert_eq!(stripped.lines().count(), code.lines().count());
        assert!(!stripped.contains("note"));
        assert!(stripped.contains("\"// not a comment\""));
        assert!(!stripped.contains("multi"));
        assert!(stripped.contains("z;"));
    }

    #[test]
    fn formatting_only_changes_share_a_token_stream() {
        let before = "if(a){b();}";
        let after = "if (a) {\n    b(); // call\n}";
        assert!(same_token_stream(before, after));
        assert!(!same_token_stream(before, "if (a) { c(); }"));
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        let code = r#"s = "a\"b // c"; // tail"#;
        let stripped = strip_comments(code);
        assert!(stripped.contains(r#""a\"b // c""#));
        assert!(!stripped.contains("tail"));
    }
}
