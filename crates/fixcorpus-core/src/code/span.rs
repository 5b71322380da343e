//! Verbatim span matching against a function body.
//!
//! A candidate span matches when it occurs in the body after ignoring
//! trailing whitespace on every line and the indentation of its first
//! line. Matches are mapped back to byte offsets in the original body, so
//! the ground truth is always sliced from the body itself.

use crate::domain::Span;

/// Byte offsets of line starts, for offset <-> line conversion.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        if starts.last() == Some(&text.len()) && !text.is_empty() {
            starts.pop();
        }
        Self {
            starts,
            len: text.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        if self.len == 0 {
            0
        } else {
            self.starts.len()
        }
    }

    /// 1-based line containing `offset`.
    pub fn line_of(&self, offset: usize) -> u32 {
        let idx = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        idx as u32 + 1
    }

    /// Byte range of 1-based `line`, excluding the newline.
    pub fn line_range(&self, text: &str, line: u32) -> Option<(usize, usize)> {
        let idx = (line as usize).checked_sub(1)?;
        let start = *self.starts.get(idx)?;
        let end = match self.starts.get(idx + 1) {
            Some(next) => next - 1,
            None if text.ends_with('\n') => self.len - 1,
            None => self.len,
        };
        let end = if text[start..end].ends_with('\r') {
            end - 1
        } else {
            end
        };
        Some((start, end))
    }
}

/// Build a [`Span`] for `[start, end)` of `text`.
pub fn span_at(text: &str, start: usize, end: usize) -> Span {
    let index = LineIndex::new(text);
    Span {
        start,
        end,
        start_line: index.line_of(start),
        end_line: index.line_of(end.saturating_sub(1).max(start)),
    }
}

/// Outcome of looking for a candidate span in a body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpanMatch {
    Unique(Span),
    NotFound,
    Ambiguous(usize),
}

/// Strip trailing whitespace from every line, recording for each output
/// byte the byte it came from.
fn normalize_haystack(text: &str) -> (String, Vec<usize>) {
    let mut out = String::with_capacity(text.len());
    let mut map = Vec::with_capacity(text.len());
    let mut offset = 0;
    for piece in text.split_inclusive('\n') {
        let (content, newline) = match piece.strip_suffix('\n') {
            Some(c) => (c, true),
            None => (piece, false),
        };
        let kept = content.trim_end();
        out.push_str(kept);
        map.extend(offset..offset + kept.len());
        if newline {
            out.push('\n');
            map.push(offset + content.len());
        }
        offset += piece.len();
    }
    (out, map)
}

/// Trailing whitespace per line, surrounding blank lines and first-line
/// indentation removed.
pub fn normalize_candidate(candidate: &str) -> String {
    let lines: Vec<&str> = candidate.lines().map(str::trim_end).collect();
    let first = lines.iter().position(|l| !l.is_empty());
    let last = lines.iter().rposition(|l| !l.is_empty());
    let (Some(first), Some(last)) = (first, last) else {
        return String::new();
    };
    let mut out = lines[first].trim_start().to_string();
    for line in &lines[first + 1..=last] {
        out.push('\n');
        out.push_str(line);
    }
    out
}

/// Locate `candidate` verbatim in `body`.
pub fn find_verbatim(body: &str, candidate: &str) -> SpanMatch {
    let needle = normalize_candidate(candidate);
    if needle.is_empty() {
        return SpanMatch::NotFound;
    }
    let (hay, map) = normalize_haystack(body);
    let hits: Vec<usize> = hay.match_indices(&needle).map(|(i, _)| i).collect();
    match hits.as_slice() {
        [] => SpanMatch::NotFound,
        [start] => {
            let end = start + needle.len();
            let orig_start = map[*start];
            let orig_end = map[end - 1] + 1;
            SpanMatch::Unique(span_at(body, orig_start, orig_end))
        }
        many => SpanMatch::Ambiguous(many.len()),
    }
}

/// Span covering 1-based lines `first..=last`, without the first line's
/// indentation or the last line's trailing whitespace.
pub fn span_from_lines(body: &str, first: u32, last: u32) -> Option<Span> {
    if first == 0 || first > last {
        return None;
    }
    let index = LineIndex::new(body);
    let (first_start, first_end) = index.line_range(body, first)?;
    let (_, last_end) = index.line_range(body, last)?;
    let indent = body[first_start..first_end].len() - body[first_start..first_end].trim_start().len();
    let start = first_start + indent;
    let end = start + body[start..last_end].trim_end().len();
    if end <= start {
        return None;
    }
    Some(span_at(body, start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "int parse_header(char *buf)\n{\n    char name[8];   \n    strcpy(name, buf);\n    return 0;\n}\n";

    #[test]
    fn line_index_basics() {
        let idx = LineIndex::new("a\nbb\nccc");
        assert_eq!(idx.line_count(), 3);
        assert_eq!(idx.line_of(0), 1);
        assert_eq!(idx.line_of(2), 2);
        assert_eq!(idx.line_of(5), 3);
        assert_eq!(idx.line_range("a\nbb\nccc", 2), Some((2, 4)));
        assert_eq!(idx.line_range("a\nbb\nccc", 4), None);
        assert_eq!(LineIndex::new("x\n").line_count(), 1);
    }

    #[test]
    fn unique_match_ignores_indentation_and_trailing_space() {
        let SpanMatch::Unique(span) = find_verbatim(BODY, "char name[8];\n    strcpy(name, buf);   \n")
        else {
            panic!("expected a unique match");
        };
        assert_eq!(&BODY[span.start..span.end], "char name[8];   \n    strcpy(name, buf);");
        assert_eq!(span.start_line, 3);
        assert_eq!(span.end_line, 4);
    }

    #[test]
    fn hallucinated_span_is_not_found() {
        assert_eq!(find_verbatim(BODY, "memcpy(name, buf, len);"), SpanMatch::NotFound);
        assert_eq!(find_verbatim(BODY, "   \n  "), SpanMatch::NotFound);
    }

    #[test]
    fn repeated_span_is_ambiguous() {
        let body = "{\n    i++;\n    i++;\n}\n";
        assert_eq!(find_verbatim(body, "i++;"), SpanMatch::Ambiguous(2));
    }

    #[test]
    fn spans_from_line_numbers() {
        let span = span_from_lines(BODY, 4, 4).unwrap();
        assert_eq!(&BODY[span.start..span.end], "strcpy(name, buf);");
        let span = span_from_lines(BODY, 3, 4).unwrap();
        assert_eq!(&BODY[span.start..span.end], "char name[8];   \n    strcpy(name, buf);");
        assert!(span_from_lines(BODY, 5, 3).is_none());
        assert!(span_from_lines(BODY, 0, 1).is_none());
        assert!(span_from_lines(BODY, 7, 9).is_none());
    }

    #[test]
    fn crlf_bodies_match() {
        let body = "{\r\n    free(p);\r\n    use(p);\r\n}\r\n";
        let SpanMatch::Unique(span) = find_verbatim(body, "free(p);") else {
            panic!("expected a unique match");
        };
        assert_eq!(&body[span.start..span.end], "free(p);");
    }
}
