//! Resumable stage cursors.
//!
//! A cursor records which index ranges of a stage's input have been fully
//! committed to the stage output. It is persisted next to the output after
//! every batch, so a crashed run restarts from what was actually written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage_traits::ContentDigest;

/// Half-open index range `[start, end)` over a stage's key-ordered input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IndexRange {
    pub start: usize,
    pub end: usize,
}

impl IndexRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, idx: usize) -> bool {
        idx >= self.start && idx < self.end
    }
}

impl std::fmt::Display for IndexRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Persisted progress of one stage over one version of its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCursor {
    /// Stage name (store key prefix)
    pub stage: String,
    /// Run that last advanced this cursor
    pub run_id: String,
    /// Digest of the predecessor output this cursor indexes into
    pub input_digest: ContentDigest,
    /// Number of input records
    pub input_len: usize,
    /// Committed ranges, sorted and non-overlapping
    pub covered: Vec<IndexRange>,
    pub updated_at: DateTime<Utc>,
}

impl StageCursor {
    pub fn new(stage: &str, run_id: &str, input_digest: ContentDigest, input_len: usize) -> Self {
        Self {
            stage: stage.to_string(),
            run_id: run_id.to_string(),
            input_digest,
            input_len,
            covered: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Whether this cursor indexes the given input version.
    pub fn matches_input(&self, digest: &ContentDigest, len: usize) -> bool {
        &self.input_digest == digest && self.input_len == len
    }

    /// Record `range` as committed, merging with adjacent or overlapping ranges.
    pub fn mark_covered(&mut self, range: IndexRange) {
        if range.is_empty() {
            return;
        }
        self.covered.push(range);
        self.covered.sort();

        let mut merged: Vec<IndexRange> = Vec::with_capacity(self.covered.len());
        for r in self.covered.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
                _ => merged.push(r),
            }
        }
        self.covered = merged;
        self.updated_at = Utc::now();
    }

    pub fn is_covered(&self, idx: usize) -> bool {
        self.covered.iter().any(|r| r.contains(idx))
    }

    /// Sub-ranges of `range` not yet committed, in order.
    pub fn uncovered_within(&self, range: IndexRange) -> Vec<IndexRange> {
        let mut gaps = Vec::new();
        let mut pos = range.start;
        for r in &self.covered {
            if r.end <= pos {
                continue;
            }
            if r.start >= range.end {
                break;
            }
            if r.start > pos {
                gaps.push(IndexRange::new(pos, r.start.min(range.end)));
            }
            pos = pos.max(r.end);
            if pos >= range.end {
                break;
            }
        }
        if pos < range.end {
            gaps.push(IndexRange::new(pos, range.end));
        }
        gaps
    }

    /// Number of input indices committed.
    pub fn covered_count(&self) -> usize {
        self.covered.iter().map(IndexRange::len).sum()
    }

    /// True once every input index has been committed.
    pub fn is_complete(&self) -> bool {
        self.uncovered_within(IndexRange::new(0, self.input_len))
            .is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(len: usize) -> StageCursor {
        StageCursor::new("s0_triage", "run-1", ContentDigest::from_bytes(b"input"), len)
    }

    #[test]
    fn merges_adjacent_and_overlapping_ranges() {
        let mut c = cursor(100);
        c.mark_covered(IndexRange::new(10, 20));
        c.mark_covered(IndexRange::new(0, 10));
        c.mark_covered(IndexRange::new(15, 30));
        c.mark_covered(IndexRange::new(50, 60));
        assert_eq!(
            c.covered,
            vec![IndexRange::new(0, 30), IndexRange::new(50, 60)]
        );
        assert_eq!(c.covered_count(), 40);
    }

    #[test]
    fn uncovered_within_reports_gaps() {
        let mut c = cursor(100);
        c.mark_covered(IndexRange::new(10, 20));
        c.mark_covered(IndexRange::new(30, 40));
        assert_eq!(
            c.uncovered_within(IndexRange::new(0, 50)),
            vec![
                IndexRange::new(0, 10),
                IndexRange::new(20, 30),
                IndexRange::new(40, 50)
            ]
        );
        assert_eq!(
            c.uncovered_within(IndexRange::new(12, 18)),
            Vec::<IndexRange>::new()
        );
        assert_eq!(
            c.uncovered_within(IndexRange::new(15, 35)),
            vec![IndexRange::new(20, 30)]
        );
    }

    #[test]
    fn completeness() {
        let mut c = cursor(10);
        assert!(!c.is_complete());
        c.mark_covered(IndexRange::new(0, 4));
        c.mark_covered(IndexRange::new(4, 10));
        assert!(c.is_complete());
        assert!(cursor(0).is_complete());
    }

    #[test]
    fn empty_range_is_ignored() {
        let mut c = cursor(10);
        c.mark_covered(IndexRange::new(5, 5));
        assert!(c.covered.is_empty());
    }

    #[test]
    fn input_matching() {
        let c = cursor(10);
        assert!(c.matches_input(&ContentDigest::from_bytes(b"input"), 10));
        assert!(!c.matches_input(&ContentDigest::from_bytes(b"other"), 10));
        assert!(!c.matches_input(&ContentDigest::from_bytes(b"input"), 11));
    }
}
