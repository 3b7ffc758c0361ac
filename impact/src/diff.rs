// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use anyhow::{bail, format_err, Context, Result};
use coverage::{Line, SourcePath};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Inclusive range of 1-indexed lines.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct LineRange {
    pub start: Line,
    pub end: Line,
}

impl LineRange {
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start > end {
            bail!("line range is reversed: {}-{}", start, end);
        }

        Ok(Self {
            start: Line::new(start)?,
            end: Line::new(end)?,
        })
    }

    pub fn single(line: u32) -> Result<Self> {
        Self::new(line, line)
    }

    pub fn contains(&self, line: Line) -> bool {
        self.start <= line && line <= self.end
    }

    pub fn intersects(&self, start: Line, end: Line) -> bool {
        self.start <= end && start <= self.end
    }

    pub fn lines(&self) -> impl Iterator<Item = Line> {
        let end = self.end.number();

        // Both bounds were validated at construction.
        (self.start.number()..=end).filter_map(|n| Line::new(n).ok())
    }
}

/// Sort ranges and merge those that overlap or touch.
fn normalize(ranges: &mut Vec<LineRange>) {
    ranges.sort();

    let mut merged: Vec<LineRange> = Vec::with_capacity(ranges.len());

    for range in ranges.drain(..) {
        match merged.last_mut() {
            Some(last) if range.start.number() <= last.end.number().saturating_add(1) => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }

    *ranges = merged;
}

/// Changed lines of one file.
///
/// Added ranges are in the coordinates of the new file, removed ranges in
/// those of the old one.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DiffHunk {
    pub path: SourcePath,
    pub added: Vec<LineRange>,
    pub removed: Vec<LineRange>,
}

impl DiffHunk {
    pub fn new(path: SourcePath) -> Self {
        Self {
            path,
            added: vec![],
            removed: vec![],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Changed lines across a whole diff, keyed by path.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ChangeSet {
    files: BTreeMap<SourcePath, DiffHunk>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from externally computed `(start, end)` ranges of added lines.
    pub fn from_ranges<I, R>(files: I) -> Result<Self>
    where
        I: IntoIterator<Item = (SourcePath, R)>,
        R: IntoIterator<Item = (u32, u32)>,
    {
        let mut changes = Self::new();

        for (path, ranges) in files {
            for (start, end) in ranges {
                let range = LineRange::new(start, end)
                    .with_context(|| format!("invalid changed range in {path}"))?;
                changes.add(&path, range);
            }
        }

        Ok(changes)
    }

    pub fn add(&mut self, path: &SourcePath, range: LineRange) {
        let hunk = self.hunk(path);
        hunk.added.push(range);
        normalize(&mut hunk.added);
    }

    pub fn remove(&mut self, path: &SourcePath, range: LineRange) {
        let hunk = self.hunk(path);
        hunk.removed.push(range);
        normalize(&mut hunk.removed);
    }

    pub fn get(&self, path: &SourcePath) -> Option<&DiffHunk> {
        self.files.get(path)
    }

    pub fn hunks(&self) -> impl Iterator<Item = &DiffHunk> {
        self.files.values()
    }

    pub fn is_empty(&self) -> bool {
        self.files.values().all(DiffHunk::is_empty)
    }

    fn hunk(&mut self, path: &SourcePath) -> &mut DiffHunk {
        self.files
            .entry(path.clone())
            .or_insert_with(|| DiffHunk::new(path.clone()))
    }
}

fn hunk_header() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@")
            .expect("hunk header regex failed to compile")
    })
}

/// Strip the `a/` or `b/` prefix git puts on diff paths. `None` for
/// `/dev/null`.
fn diff_path(text: &str) -> Result<Option<SourcePath>> {
    // Tab-separated timestamps follow the path in non-git diffs.
    let text = text.split('\t').next().unwrap_or(text).trim();

    if text == "/dev/null" {
        return Ok(None);
    }

    let text = text
        .strip_prefix("a/")
        .or_else(|| text.strip_prefix("b/"))
        .unwrap_or(text);

    Ok(Some(SourcePath::new(text)?))
}

struct Cursor {
    old_path: Option<SourcePath>,
    new_path: Option<SourcePath>,
    old_line: u32,
    new_line: u32,
    old_left: u32,
    new_left: u32,
}

/// Parse the changed lines out of a unified diff, e.g. `git diff` output.
pub fn parse_unified_diff(text: &str) -> Result<ChangeSet> {
    let mut changes = ChangeSet::new();

    let mut cursor = Cursor {
        old_path: None,
        new_path: None,
        old_line: 0,
        new_line: 0,
        old_left: 0,
        new_left: 0,
    };

    for (index, line) in text.lines().enumerate() {
        let at = || format!("diff line {}", index + 1);

        let in_hunk = cursor.old_left > 0 || cursor.new_left > 0;

        if !in_hunk {
            if let Some(path) = line.strip_prefix("--- ") {
                cursor.old_path = diff_path(path).with_context(at)?;
                continue;
            }

            if let Some(path) = line.strip_prefix("+++ ") {
                cursor.new_path = diff_path(path).with_context(at)?;
                continue;
            }

            if line.starts_with("@@") {
                let captures = hunk_header()
                    .captures(line)
                    .ok_or_else(|| format_err!("invalid hunk header at {}", at()))?;

                let number = |i: usize, default: u32| -> Result<u32> {
                    match captures.get(i) {
                        Some(m) => m.as_str().parse().with_context(at),
                        None => Ok(default),
                    }
                };

                cursor.old_line = number(1, 0)?;
                cursor.old_left = number(2, 1)?;
                cursor.new_line = number(3, 0)?;
                cursor.new_left = number(4, 1)?;

                if cursor.old_path.is_none() && cursor.new_path.is_none() {
                    bail!("hunk without file headers at {}", at());
                }

                continue;
            }

            // `diff --git`, `index`, mode and rename lines.
            continue;
        }

        match line.as_bytes().first() {
            Some(b'+') => {
                if let Some(path) = &cursor.new_path {
                    changes.add(path, LineRange::single(cursor.new_line).with_context(at)?);
                }
                cursor.new_line += 1;
                cursor.new_left = cursor.new_left.saturating_sub(1);
            }
            Some(b'-') => {
                if let Some(path) = &cursor.old_path {
                    changes.remove(path, LineRange::single(cursor.old_line).with_context(at)?);
                }
                cursor.old_line += 1;
                cursor.old_left = cursor.old_left.saturating_sub(1);
            }
            Some(b'\\') => {
                // "\ No newline at end of file"
            }
            _ => {
                // Context; an empty line is context with its leading space trimmed.
                cursor.old_line += 1;
                cursor.new_line += 1;
                cursor.old_left = cursor.old_left.saturating_sub(1);
                cursor.new_left = cursor.new_left.saturating_sub(1);
            }
        }
    }

    if cursor.old_left > 0 || cursor.new_left > 0 {
        debug!(
            "diff ended inside a hunk ({} old, {} new lines missing)",
            cursor.old_left, cursor.new_left
        );
    }

    Ok(changes)
}
