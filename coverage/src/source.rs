// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::path::SourcePath;

/// Line number in a source file (1-indexed).
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Line(u32);

impl Line {
    pub fn new(number: u32) -> Result<Self> {
        if number == 0 {
            bail!("source lines must be 1-indexed");
        }

        Ok(Self(number))
    }

    pub fn number(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one branch arm on a line, as reported by the coverage tool.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct BranchId(pub String);

/// Hit information as reported by a coverage tool.
///
/// Some formats report execution counts, others only whether a line ran.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Hits {
    Count(u64),
    Covered(bool),
}

impl Hits {
    pub fn is_hit(&self) -> bool {
        match self {
            Hits::Count(count) => *count > 0,
            Hits::Covered(covered) => *covered,
        }
    }

    pub fn count(&self) -> Option<u64> {
        match self {
            Hits::Count(count) => Some(*count),
            Hits::Covered(_) => None,
        }
    }
}

/// Reported condition coverage for a line, e.g. `condition-coverage="50% (1/2)"`.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Conditions {
    pub covered: u32,
    pub total: u32,
}

impl Conditions {
    /// Component-wise max.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            covered: self.covered.max(other.covered),
            total: self.total.max(other.total),
        }
    }
}

/// One observation from a coverage report.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CoverageRecord {
    pub path: SourcePath,
    pub line: Line,
    pub hits: Hits,

    /// Set when the record describes a single branch arm rather than the line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<BranchId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

impl CoverageRecord {
    pub fn line(path: SourcePath, line: Line, hits: Hits) -> Self {
        Self {
            path,
            line,
            hits,
            branch: None,
            conditions: None,
        }
    }

    pub fn branch(path: SourcePath, line: Line, branch: BranchId, taken: bool) -> Self {
        Self {
            path,
            line,
            hits: Hits::Covered(taken),
            branch: Some(branch),
            conditions: None,
        }
    }
}

/// Aggregated status of a single instrumented line.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LineCoverage {
    pub hit: bool,

    /// Summed execution count, if any contributing report tracked counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branches: BTreeMap<BranchId, bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Conditions>,
}

impl LineCoverage {
    /// Fold a record into this line.
    ///
    /// Branch records only touch the branch map: a taken branch arm says
    /// nothing about how often the line itself ran.
    pub fn record(&mut self, record: &CoverageRecord) {
        match &record.branch {
            Some(branch) => {
                let taken = self.branches.entry(branch.clone()).or_default();
                *taken |= record.hits.is_hit();
            }
            None => {
                self.hit |= record.hits.is_hit();
                self.count = add_counts(self.count, record.hits.count());
            }
        }

        if let Some(conditions) = &record.conditions {
            self.conditions = Some(match &self.conditions {
                Some(existing) => existing.merge(conditions),
                None => *conditions,
            });
        }
    }

    /// Merge another aggregate into this one. Commutative and associative.
    pub fn merge(&mut self, other: &LineCoverage) {
        self.hit |= other.hit;
        self.count = add_counts(self.count, other.count);

        for (branch, taken) in &other.branches {
            *self.branches.entry(branch.clone()).or_default() |= *taken;
        }

        self.conditions = match (&self.conditions, &other.conditions) {
            (Some(lhs), Some(rhs)) => Some(lhs.merge(rhs)),
            (lhs, rhs) => lhs.or(*rhs),
        };
    }

    /// A positive execution count always implies a hit.
    pub fn is_consistent(&self) -> bool {
        !matches!(self.count, Some(count) if count > 0 && !self.hit)
    }
}

fn add_counts(lhs: Option<u64>, rhs: Option<u64>) -> Option<u64> {
    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => Some(lhs.saturating_add(rhs)),
        (lhs, rhs) => lhs.or(rhs),
    }
}

/// Per-line coverage of one file.
///
/// Lines absent from the map were not instrumented, which is distinct from
/// a line that is present but was never hit.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FileCoverage {
    pub lines: BTreeMap<Line, LineCoverage>,
}

impl FileCoverage {
    pub fn record(&mut self, record: &CoverageRecord) {
        self.lines.entry(record.line).or_default().record(record);
    }

    pub fn merge(&mut self, other: &FileCoverage) {
        for (line, coverage) in &other.lines {
            self.lines.entry(*line).or_default().merge(coverage);
        }
    }

    pub fn is_instrumented(&self, line: Line) -> bool {
        self.lines.contains_key(&line)
    }

    /// `None` when the line was not instrumented.
    pub fn is_hit(&self, line: Line) -> Option<bool> {
        self.lines.get(&line).map(|coverage| coverage.hit)
    }

    pub fn hit_lines(&self) -> usize {
        self.lines.values().filter(|coverage| coverage.hit).count()
    }
}

/// Coverage of a whole source tree, keyed by canonical path.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SourceCoverage {
    pub files: BTreeMap<SourcePath, FileCoverage>,
}

impl SourceCoverage {
    pub fn record(&mut self, record: &CoverageRecord) {
        self.files
            .entry(record.path.clone())
            .or_default()
            .record(record);
    }

    pub fn absorb(&mut self, other: SourceCoverage) {
        for (path, file) in other.files {
            match self.files.get_mut(&path) {
                Some(existing) => existing.merge(&file),
                None => {
                    self.files.insert(path, file);
                }
            }
        }
    }

    pub fn file(&self, path: &SourcePath) -> Option<&FileCoverage> {
        self.files.get(path)
    }
}
