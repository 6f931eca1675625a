//! Line-level diffing of proposed file content.
//!
//! Alignment is a Longest Common Subsequence over lines after trimming the
//! common prefix and suffix. Lines keep their terminators, so a missing final
//! newline is a real difference and is rendered with the usual
//! `\ No newline at end of file` marker.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::solution::{FileOperation, OperationKind};
use crate::workspace::Workspace;

/// Context lines around each hunk.
pub const DEFAULT_CONTEXT: usize = 3;

/// Above this many DP cells the changed middle is emitted as one
/// delete-then-insert block instead of being aligned.
const MAX_LCS_CELLS: usize = 4_000_000;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// One aligned line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edit {
    Equal(String),
    Delete(String),
    Insert(String),
}

/// Line alignment between two texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDiff {
    pub edits: Vec<Edit>,
}

impl LineDiff {
    pub fn additions(&self) -> usize {
        self.edits.iter().filter(|e| matches!(e, Edit::Insert(_))).count()
    }

    pub fn deletions(&self) -> usize {
        self.edits.iter().filter(|e| matches!(e, Edit::Delete(_))).count()
    }

    pub fn is_unchanged(&self) -> bool {
        self.edits.iter().all(|e| matches!(e, Edit::Equal(_)))
    }

    /// Old side, reassembled.
    pub fn before(&self) -> String {
        self.edits
            .iter()
            .filter_map(|e| match e {
                Edit::Equal(l) | Edit::Delete(l) => Some(l.as_str()),
                Edit::Insert(_) => None,
            })
            .collect()
    }

    /// New side, reassembled.
    pub fn after(&self) -> String {
        self.edits
            .iter()
            .filter_map(|e| match e {
                Edit::Equal(l) | Edit::Insert(l) => Some(l.as_str()),
                Edit::Delete(_) => None,
            })
            .collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("malformed patch at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("patch does not match the original at line {line}")]
    Mismatch { line: usize },
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Align `before` and `after` line by line.
pub fn diff_text(before: &str, after: &str) -> LineDiff {
    let a = split_lines(before);
    let b = split_lines(after);

    let prefix = a.iter().zip(&b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut edits: Vec<Edit> = a[..prefix].iter().map(|l| Edit::Equal(l.to_string())).collect();
    if a_mid.len().saturating_mul(b_mid.len()) > MAX_LCS_CELLS {
        edits.extend(a_mid.iter().map(|l| Edit::Delete(l.to_string())));
        edits.extend(b_mid.iter().map(|l| Edit::Insert(l.to_string())));
    } else {
        edits.extend(lcs_edits(a_mid, b_mid));
    }
    edits.extend(a[a.len() - suffix..].iter().map(|l| Edit::Equal(l.to_string())));

    LineDiff { edits }
}

fn lcs_edits(a: &[&str], b: &[&str]) -> Vec<Edit> {
    let m = a.len();
    let n = b.len();
    let width = n + 1;

    // dp[i * width + j] = LCS length of a[..i] and b[..j]
    let mut dp = vec![0u32; (m + 1) * width];
    for i in 1..=m {
        for j in 1..=n {
            dp[i * width + j] = if a[i - 1] == b[j - 1] {
                dp[(i - 1) * width + j - 1] + 1
            } else {
                dp[i * width + j - 1].max(dp[(i - 1) * width + j])
            };
        }
    }

    // Backtrack from the end. Preferring insertions here puts deletions
    // first once the list is reversed.
    let mut rev = Vec::with_capacity(m + n);
    let (mut i, mut j) = (m, n);
    while i > 0 && j > 0 {
        if a[i - 1] == b[j - 1] {
            rev.push(Edit::Equal(a[i - 1].to_string()));
            i -= 1;
            j -= 1;
        } else if dp[i * width + j - 1] >= dp[(i - 1) * width + j] {
            rev.push(Edit::Insert(b[j - 1].to_string()));
            j -= 1;
        } else {
            rev.push(Edit::Delete(a[i - 1].to_string()));
            i -= 1;
        }
    }
    while j > 0 {
        rev.push(Edit::Insert(b[j - 1].to_string()));
        j -= 1;
    }
    while i > 0 {
        rev.push(Edit::Delete(a[i - 1].to_string()));
        i -= 1;
    }
    rev.reverse();
    rev
}

/// Unified diff of `before` against `after`. Empty when they are equal.
pub fn unified_diff(
    old_label: &str,
    new_label: &str,
    before: &str,
    after: &str,
    context: usize,
) -> String {
    render_unified(old_label, new_label, &diff_text(before, after), context)
}

/// Render an existing alignment as a unified diff.
pub fn render_unified(old_label: &str, new_label: &str, diff: &LineDiff, context: usize) -> String {
    let changes: Vec<usize> = diff
        .edits
        .iter()
        .enumerate()
        .filter(|(_, e)| !matches!(e, Edit::Equal(_)))
        .map(|(idx, _)| idx)
        .collect();
    let Some(&first) = changes.first() else {
        return String::new();
    };

    // Group changes whose separating run of equal lines fits in the context.
    let mut groups: Vec<(usize, usize)> = Vec::new();
    let mut start = first;
    let mut end = first;
    for &idx in &changes[1..] {
        if idx - end - 1 > 2 * context {
            groups.push((start, end));
            start = idx;
        }
        end = idx;
    }
    groups.push((start, end));

    // 1-based line positions before each edit.
    let mut old_pos = Vec::with_capacity(diff.edits.len());
    let mut new_pos = Vec::with_capacity(diff.edits.len());
    let (mut o, mut n) = (0usize, 0usize);
    for edit in &diff.edits {
        old_pos.push(o);
        new_pos.push(n);
        match edit {
            Edit::Equal(_) => {
                o += 1;
                n += 1;
            }
            Edit::Delete(_) => o += 1,
            Edit::Insert(_) => n += 1,
        }
    }

    let mut out = format!("--- {old_label}\n+++ {new_label}\n");
    for (first_change, last_change) in groups {
        let lo = first_change.saturating_sub(context);
        let hi = (last_change + context + 1).min(diff.edits.len());
        let slice = &diff.edits[lo..hi];

        let old_count = slice.iter().filter(|e| !matches!(e, Edit::Insert(_))).count();
        let new_count = slice.iter().filter(|e| !matches!(e, Edit::Delete(_))).count();
        let old_start = if old_count == 0 { old_pos[lo] } else { old_pos[lo] + 1 };
        let new_start = if new_count == 0 { new_pos[lo] } else { new_pos[lo] + 1 };
        out.push_str(&format!(
            "@@ -{old_start},{old_count} +{new_start},{new_count} @@\n"
        ));

        for edit in slice {
            let (sign, line) = match edit {
                Edit::Equal(l) => (' ', l),
                Edit::Delete(l) => ('-', l),
                Edit::Insert(l) => ('+', l),
            };
            out.push(sign);
            out.push_str(line);
            if !line.ends_with('\n') {
                out.push('\n');
                out.push_str(NO_NEWLINE_MARKER);
                out.push('\n');
            }
        }
    }
    out
}

struct Hunk {
    old_start: usize,
    old_count: usize,
    header_line: usize,
    lines: Vec<(char, String)>,
}

fn parse_range(s: &str, line: usize) -> Result<(usize, usize), DiffError> {
    let malformed = || DiffError::Malformed {
        line,
        reason: format!("bad range {s:?}"),
    };
    let (start, count) = match s.split_once(',') {
        Some((start, count)) => (start, count),
        None => (s, "1"),
    };
    Ok((
        start.parse().map_err(|_| malformed())?,
        count.parse().map_err(|_| malformed())?,
    ))
}

fn parse_hunks(patch: &str) -> Result<Vec<Hunk>, DiffError> {
    let mut hunks: Vec<Hunk> = Vec::new();
    for (idx, raw) in patch.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        if let Some(header) = raw.strip_prefix("@@ ") {
            let malformed = |reason: &str| DiffError::Malformed {
                line: line_no,
                reason: reason.to_string(),
            };
            if !header.contains("@@") {
                return Err(malformed("unterminated hunk header"));
            }
            let body = header.split("@@").next().unwrap_or_default();
            let mut parts = body.split_whitespace();
            let old = parts
                .next()
                .and_then(|p| p.strip_prefix('-'))
                .ok_or_else(|| malformed("missing old range"))?;
            let (old_start, old_count) = parse_range(old, line_no)?;
            hunks.push(Hunk {
                old_start,
                old_count,
                header_line: line_no,
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = hunks.last_mut() else {
            // File headers and preamble.
            continue;
        };
        match raw.chars().next() {
            Some(sign @ (' ' | '-' | '+')) => hunk.lines.push((sign, raw[1..].to_string())),
            Some('\\') => {
                let Some((_, last)) = hunk.lines.last_mut() else {
                    return Err(DiffError::Malformed {
                        line: line_no,
                        reason: "no-newline marker without a preceding line".into(),
                    });
                };
                if last.ends_with('\n') {
                    last.pop();
                }
            }
            Some('\n') | None => hunk.lines.push((' ', "\n".to_string())),
            Some(_) => {
                return Err(DiffError::Malformed {
                    line: line_no,
                    reason: "unexpected line in hunk".into(),
                })
            }
        }
    }
    Ok(hunks)
}

/// Apply a unified diff produced by [`unified_diff`] to `before`.
pub fn apply_unified(before: &str, patch: &str) -> Result<String, DiffError> {
    let original = split_lines(before);
    let hunks = parse_hunks(patch)?;

    let mut out = String::with_capacity(before.len());
    let mut cursor = 0usize;
    for hunk in hunks {
        let target = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start.saturating_sub(1)
        };
        if target < cursor || target > original.len() {
            return Err(DiffError::Mismatch {
                line: hunk.header_line,
            });
        }
        for line in &original[cursor..target] {
            out.push_str(line);
        }
        let mut pos = target;
        for (sign, content) in &hunk.lines {
            match sign {
                '+' => out.push_str(content),
                _ => {
                    if original.get(pos) != Some(&content.as_str()) {
                        return Err(DiffError::Mismatch { line: pos + 1 });
                    }
                    if *sign == ' ' {
                        out.push_str(content);
                    }
                    pos += 1;
                }
            }
        }
        cursor = pos;
    }
    for line in &original[cursor..] {
        out.push_str(line);
    }
    Ok(out)
}

/// Diff of one file operation against the current filesystem state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub kind: OperationKind,
    pub additions: usize,
    pub deletions: usize,
    pub unified: String,
}

impl FileDiff {
    /// Compute the diff `op` would produce if applied now.
    pub fn for_operation(workspace: &Workspace, op: &FileOperation) -> io::Result<Self> {
        let current = || -> io::Result<String> {
            match std::fs::read(workspace.join(&op.path)) {
                Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(String::new()),
                Err(e) => Err(e),
            }
        };
        let proposed = op.content.as_deref().unwrap_or("");
        let old_label = format!("a/{}", op.path);
        let new_label = format!("b/{}", op.path);

        let (old_label, new_label, before, after) = match op.kind {
            OperationKind::Create => ("/dev/null".to_string(), new_label, String::new(), proposed),
            OperationKind::Modify => (old_label, new_label, current()?, proposed),
            OperationKind::Delete => (old_label, "/dev/null".to_string(), current()?, ""),
        };

        let diff = diff_text(&before, after);
        Ok(Self {
            path: op.path.clone(),
            kind: op.kind,
            additions: diff.additions(),
            deletions: diff.deletions(),
            unified: render_unified(&old_label, &new_label, &diff, DEFAULT_CONTEXT),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_texts_produce_no_diff() {
        let d = diff_text("a\nb\n", "a\nb\n");
        assert!(d.is_unchanged());
        assert_eq!(unified_diff("a/x", "b/x", "a\nb\n", "a\nb\n", 3), "");
    }

    #[test]
    fn test_replacement_lists_deletion_first() {
        let d = diff_text("a\nold\nc\n", "a\nnew\nc\n");
        assert_eq!(
            d.edits,
            vec![
                Edit::Equal("a\n".into()),
                Edit::Delete("old\n".into()),
                Edit::Insert("new\n".into()),
                Edit::Equal("c\n".into()),
            ]
        );
        assert_eq!((d.additions(), d.deletions()), (1, 1));
    }

    #[test]
    fn test_unified_format() {
        let patch = unified_diff("a/f.txt", "b/f.txt", "one\ntwo\nthree\n", "one\n2\nthree\n", 3);
        assert_eq!(
            patch,
            "--- a/f.txt\n+++ b/f.txt\n@@ -1,3 +1,3 @@\n one\n-two\n+2\n three\n"
        );
    }

    #[test]
    fn test_missing_final_newline_marker() {
        let patch = unified_diff("a/f", "b/f", "x\n", "x\ny", 3);
        assert!(patch.contains("+y\n\\ No newline at end of file\n"));
        assert_eq!(apply_unified("x\n", &patch).unwrap(), "x\ny");
    }

    #[test]
    fn test_create_from_empty() {
        let patch = unified_diff("/dev/null", "b/new.rs", "", "fn main() {}\n", 3);
        assert!(patch.contains("@@ -0,0 +1,1 @@"));
        assert_eq!(apply_unified("", &patch).unwrap(), "fn main() {}\n");
    }

    #[test]
    fn test_delete_everything() {
        let d = diff_text("a\nb\n", "");
        assert_eq!((d.additions(), d.deletions()), (0, 2));
        let patch = render_unified("a/f", "/dev/null", &d, 3);
        assert!(patch.contains("@@ -1,2 +0,0 @@"));
        assert_eq!(apply_unified("a\nb\n", &patch).unwrap(), "");
    }

    #[test]
    fn test_distant_changes_make_separate_hunks() {
        let before: String = (1..=20).map(|i| format!("{i}\n")).collect();
        let after: String = (1..=20)
            .map(|i| match i {
                2 => "two\n".to_string(),
                19 => "nineteen\n".to_string(),
                _ => format!("{i}\n"),
            })
            .collect();
        let patch = unified_diff("a", "b", &before, &after, 3);
        assert_eq!(patch.matches("@@ -").count(), 2);
        assert_eq!(apply_unified(&before, &patch).unwrap(), after);
    }

    #[test]
    fn test_zero_context_insertion() {
        let patch = unified_diff("a", "b", "1\n2\n3\n", "1\n2\nx\n3\n", 0);
        assert!(patch.contains("@@ -2,0 +3,1 @@"));
        assert_eq!(apply_unified("1\n2\n3\n", &patch).unwrap(), "1\n2\nx\n3\n");
    }

    #[test]
    fn test_apply_rejects_wrong_base() {
        let patch = unified_diff("a", "b", "one\n", "two\n", 3);
        assert_eq!(
            apply_unified("other\n", &patch),
            Err(DiffError::Mismatch { line: 1 })
        );
    }

    #[test]
    fn test_apply_rejects_garbage_hunk() {
        let err = apply_unified("a\n", "@@ -x +1 @@\n").unwrap_err();
        assert!(matches!(err, DiffError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_oversized_middle_falls_back_to_block_replace() {
        let before: String = (0..2100).map(|i| format!("a{i}\n")).collect();
        let after: String = (0..2100).map(|i| format!("b{i}\n")).collect();
        let d = diff_text(&before, &after);
        assert_eq!((d.additions(), d.deletions()), (2100, 2100));
        assert!(matches!(d.edits[0], Edit::Delete(_)));
        assert_eq!(d.after(), after);
    }
}
