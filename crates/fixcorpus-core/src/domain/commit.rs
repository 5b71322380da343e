//! Commits and diffs as retrieved from version-control history.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::code::patch::{parse_patch, PatchError};

/// Stable record identifier: `repo@commit` or `repo@commit#n`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub repo: String,
    pub commit: String,
    pub sub_index: Option<u32>,
}

impl RecordKey {
    pub fn new(repo: &str, commit: &str) -> Self {
        Self {
            repo: repo.to_string(),
            commit: commit.to_string(),
            sub_index: None,
        }
    }

    pub fn with_sub_index(mut self, n: u32) -> Self {
        self.sub_index = Some(n);
        self
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.commit)?;
        if let Some(n) = self.sub_index {
            write!(f, "#{n}")?;
        }
        Ok(())
    }
}

/// Error parsing a [`RecordKey`] from its string form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid record key: {0}")]
pub struct InvalidRecordKey(pub String);

impl FromStr for RecordKey {
    type Err = InvalidRecordKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidRecordKey(s.to_string());
        let (repo, rest) = s.rsplit_once('@').ok_or_else(invalid)?;
        let (commit, sub_index) = match rest.split_once('#') {
            Some((commit, n)) => (commit, Some(n.parse::<u32>().map_err(|_| invalid())?)),
            None => (rest, None),
        };
        if repo.is_empty() || commit.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            repo: repo.to_string(),
            commit: commit.to_string(),
            sub_index,
        })
    }
}

/// Language tag derived from a file extension.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    C,
    Cc,
    Cpp,
    Cxx,
    H,
    Hh,
    Hpp,
    Other(String),
}

impl Language {
    pub fn from_path(path: &str) -> Self {
        let file = path.rsplit('/').next().unwrap_or(path);
        let ext = match file.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => String::new(),
        };
        match ext.as_str() {
            "c" => Language::C,
            "cc" => Language::Cc,
            "cpp" => Language::Cpp,
            "cxx" => Language::Cxx,
            "h" => Language::H,
            "hh" => Language::Hh,
            "hpp" => Language::Hpp,
            _ => Language::Other(ext),
        }
    }

    /// The extension this tag was derived from.
    pub fn extension(&self) -> &str {
        match self {
            Language::C => "c",
            Language::Cc => "cc",
            Language::Cpp => "cpp",
            Language::Cxx => "cxx",
            Language::H => "h",
            Language::Hh => "hh",
            Language::Hpp => "hpp",
            Language::Other(ext) => ext,
        }
    }
}

/// One line of a unified-diff hunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum DiffLine {
    Context(String),
    Added(String),
    Removed(String),
}

/// A unified-diff hunk with its old/new line coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_start: u32,
    pub old_len: u32,
    pub new_start: u32,
    pub new_len: u32,
    /// Function context git prints after the closing `@@`
    pub section: String,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    pub fn added_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Added(_)))
            .count()
    }

    pub fn removed_count(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Removed(_)))
            .count()
    }

    /// 1-based line numbers touched by this hunk in the old and new file.
    ///
    /// A pure insertion anchors on the old line it is inserted before, and
    /// a pure deletion on the new line that follows it.
    pub fn touched_lines(&self) -> (Vec<u32>, Vec<u32>) {
        let mut old_no = self.old_start;
        let mut new_no = self.new_start;
        let mut old = Vec::new();
        let mut new = Vec::new();
        for line in &self.lines {
            match line {
                DiffLine::Context(_) => {
                    old_no += 1;
                    new_no += 1;
                }
                DiffLine::Removed(_) => {
                    old.push(old_no);
                    new.push(new_no.max(1));
                    old_no += 1;
                }
                DiffLine::Added(_) => {
                    new.push(new_no);
                    old.push(old_no.max(1));
                    new_no += 1;
                }
            }
        }
        old.dedup();
        new.dedup();
        (old, new)
    }
}

/// Changes to one file within a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub language: Language,
    pub hunks: Vec<Hunk>,
    pub added: usize,
    pub removed: usize,
}

impl FileDiff {
    pub fn new(path: &str, hunks: Vec<Hunk>) -> Self {
        let added = hunks.iter().map(Hunk::added_count).sum();
        let removed = hunks.iter().map(Hunk::removed_count).sum();
        Self {
            path: path.to_string(),
            language: Language::from_path(path),
            hunks,
            added,
            removed,
        }
    }
}

/// A commit with its parsed per-file diffs. Immutable once retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub repo: String,
    pub hash: String,
    pub message: String,
    pub timestamp: DateTime<FixedOffset>,
    /// Raw unified diff as produced by the history source
    pub patch: String,
    pub files: Vec<FileDiff>,
}

impl Commit {
    /// Build a commit by parsing its unified diff.
    pub fn from_patch(
        repo: &str,
        hash: &str,
        message: &str,
        timestamp: DateTime<FixedOffset>,
        patch: &str,
    ) -> Result<Self, PatchError> {
        let files = parse_patch(patch)?;
        Ok(Self {
            repo: repo.to_string(),
            hash: hash.to_string(),
            message: message.to_string(),
            timestamp,
            patch: patch.to_string(),
            files,
        })
    }

    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.repo, &self.hash)
    }

    /// Case-insensitive substring match of the message against any keyword.
    pub fn matches_any(&self, keywords: &[String]) -> bool {
        let message = self.message.to_lowercase();
        keywords
            .iter()
            .any(|k| !k.is_empty() && message.contains(&k.to_lowercase()))
    }

    pub fn removed_lines(&self) -> usize {
        self.files.iter().map(|f| f.removed).sum()
    }

    pub fn added_lines(&self) -> usize {
        self.files.iter().map(|f| f.added).sum()
    }

    /// `git show`-like rendering: header, indented message, patch.
    pub fn render(&self) -> String {
        let mut out = format!(
            "commit {}\nDate:   {}\n\n",
            self.hash,
            self.timestamp.to_rfc3339()
        );
        for line in self.message.lines() {
            out.push_str("    ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.patch);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PATCH: &str = "diff --git a/src/http.c b/src/http.c
--- a/src/http.c
+++ b/src/http.c
@@ -10,4 +10,3 @@ int parse_header(char *buf)
 {
-    char name[8];
-    strcpy(name, buf);
+    char name[64];
     return 0;
";

    fn ts() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2021-03-04T10:00:00+01:00").unwrap()
    }

    #[test]
    fn record_key_round_trips_through_display() {
        let key = RecordKey::new("openssl", "abc123");
        assert_eq!(key.to_string(), "openssl@abc123");
        assert_eq!("openssl@abc123".parse::<RecordKey>().unwrap(), key);

        let sub = key.clone().with_sub_index(2);
        assert_eq!(sub.to_string(), "openssl@abc123#2");
        assert_eq!("openssl@abc123#2".parse::<RecordKey>().unwrap(), sub);

        assert!("no-separator".parse::<RecordKey>().is_err());
        assert!("repo@".parse::<RecordKey>().is_err());
        assert!("repo@abc#x".parse::<RecordKey>().is_err());
    }

    #[test]
    fn language_from_extension() {
        assert_eq!(Language::from_path("lib/a.c"), Language::C);
        assert_eq!(Language::from_path("a.HPP"), Language::Hpp);
        assert_eq!(
            Language::from_path("setup.py"),
            Language::Other("py".into())
        );
        assert_eq!(Language::from_path("Makefile").extension(), "");
    }

    #[test]
    fn commit_counts_and_keyword_match() {
        let commit = Commit::from_patch(
            "web",
            "abc123",
            "Fix buffer OVERFLOW in parse_header",
            ts(),
            PATCH,
        )
        .unwrap();
        assert_eq!(commit.files.len(), 1);
        assert_eq!(commit.removed_lines(), 2);
        assert_eq!(commit.added_lines(), 1);
        assert!(commit.matches_any(&["buffer overflow".into()]));
        assert!(!commit.matches_any(&["use-after-free".into()]));
        assert_eq!(commit.key().to_string(), "web@abc123");
    }

    #[test]
    fn touched_lines_anchor_both_sides() {
        let commit = Commit::from_patch("web", "abc", "fix", ts(), PATCH).unwrap();
        let (old, new) = commit.files[0].hunks[0].touched_lines();
        assert_eq!(old, vec![11, 12, 13]);
        assert_eq!(new, vec![11]);
    }

    #[test]
    fn render_contains_message_and_patch() {
        let commit = Commit::from_patch("web", "abc", "fix overflow\n\ndetails", ts(), PATCH).unwrap();
        let text = commit.render();
        assert!(text.starts_with("commit abc\n"));
        assert!(text.contains("    fix overflow\n"));
        assert!(text.ends_with(PATCH));
    }
}
