//! Unified diff parser for `git show` / `git diff` output.
//!
//! Combined diffs (merge commits) and binary changes yield files without
//! hunks; callers decide what to do with those.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{DiffLine, FileDiff, Hunk};

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@ ?(.*)$").expect("valid hunk regex")
});

/// Errors produced while parsing a unified diff.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("malformed hunk header at line {line}: {text}")]
    MalformedHunkHeader { line: usize, text: String },

    #[error("hunk before any file header at line {line}")]
    HunkWithoutFile { line: usize },

    #[error("hunk starting at line {line} ends early ({missing_old} old / {missing_new} new lines missing)")]
    TruncatedHunk {
        line: usize,
        missing_old: u32,
        missing_new: u32,
    },
}

struct OpenHunk {
    hunk: Hunk,
    header_line: usize,
    old_left: u32,
    new_left: u32,
}

impl OpenHunk {
    fn is_done(&self) -> bool {
        self.old_left == 0 && self.new_left == 0
    }
}

#[derive(Default)]
struct Parser {
    files: Vec<FileDiff>,
    path: Option<String>,
    hunks: Vec<Hunk>,
    open: Option<OpenHunk>,
}

impl Parser {
    fn close_hunk(&mut self) -> Result<(), PatchError> {
        if let Some(open) = self.open.take() {
            if !open.is_done() {
                return Err(PatchError::TruncatedHunk {
                    line: open.header_line,
                    missing_old: open.old_left,
                    missing_new: open.new_left,
                });
            }
            self.hunks.push(open.hunk);
        }
        Ok(())
    }

    fn close_file(&mut self) -> Result<(), PatchError> {
        self.close_hunk()?;
        if let Some(path) = self.path.take() {
            let hunks = std::mem::take(&mut self.hunks);
            self.files.push(FileDiff::new(&path, hunks));
        }
        Ok(())
    }
}

fn strip_prefix_path(raw: &str) -> Option<String> {
    let raw = raw.split('\t').next().unwrap_or(raw).trim();
    if raw == "/dev/null" {
        return None;
    }
    let path = raw
        .strip_prefix("a/")
        .or_else(|| raw.strip_prefix("b/"))
        .unwrap_or(raw);
    Some(path.to_string())
}

fn parse_count(m: Option<regex::Match<'_>>) -> u32 {
    m.and_then(|m| m.as_str().parse().ok()).unwrap_or(1)
}

/// Parse a unified diff into per-file diffs, in order of appearance.
pub fn parse_patch(text: &str) -> Result<Vec<FileDiff>, PatchError> {
    let mut p = Parser::default();

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;

        if let Some(open) = p.open.as_mut() {
            if !open.is_done() {
                let taken = match line.chars().next() {
                    Some(' ') | None => {
                        let body = line.get(1..).unwrap_or("");
                        open.hunk.lines.push(DiffLine::Context(body.to_string()));
                        open.old_left = open.old_left.saturating_sub(1);
                        open.new_left = open.new_left.saturating_sub(1);
                        true
                    }
                    Some('-') if open.old_left > 0 => {
                        open.hunk.lines.push(DiffLine::Removed(line[1..].to_string()));
                        open.old_left -= 1;
                        true
                    }
                    Some('+') if open.new_left > 0 => {
                        open.hunk.lines.push(DiffLine::Added(line[1..].to_string()));
                        open.new_left -= 1;
                        true
                    }
                    Some('\\') => true,
                    _ => false,
                };
                if taken {
                    continue;
                }
            } else if line.starts_with('\\') {
                continue;
            }
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            p.close_file()?;
            // `diff --git a/x b/x`: the new path is authoritative
            p.path = rest
                .rsplit_once(" b/")
                .map(|(_, b)| b.to_string())
                .or_else(|| rest.split_whitespace().last().and_then(strip_prefix_path));
        } else if line.starts_with("diff --cc ") || line.starts_with("diff --combined ") {
            p.close_file()?;
        } else if let Some(rest) = line.strip_prefix("--- ") {
            p.close_hunk()?;
            if p.path.is_none() || !p.hunks.is_empty() {
                p.close_file()?;
                p.path = strip_prefix_path(rest);
            }
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            p.close_hunk()?;
            if let Some(path) = strip_prefix_path(rest) {
                p.path = Some(path);
            }
        } else if line.starts_with("@@ ") {
            p.close_hunk()?;
            if p.path.is_none() {
                return Err(PatchError::HunkWithoutFile { line: line_no });
            }
            let caps = HUNK_HEADER
                .captures(line)
                .ok_or_else(|| PatchError::MalformedHunkHeader {
                    line: line_no,
                    text: line.to_string(),
                })?;
            let old_start = caps[1].parse().unwrap_or(0);
            let new_start = caps[3].parse().unwrap_or(0);
            let old_len = parse_count(caps.get(2));
            let new_len = parse_count(caps.get(4));
            p.open = Some(OpenHunk {
                hunk: Hunk {
                    old_start,
                    old_len,
                    new_start,
                    new_len,
                    section: caps[5].trim().to_string(),
                    lines: Vec::new(),
                },
                header_line: line_no,
                old_left: old_len,
                new_left: new_len,
            });
        }
        // Anything else (index, mode, rename, binary lines) is metadata.
    }

    p.close_file()?;
    Ok(p.files)
}
