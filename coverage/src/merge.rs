// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use thiserror::Error;

use crate::path::SourcePath;
use crate::source::{CoverageRecord, FileCoverage, Line, SourceCoverage};

/// A merged line violated the data-model invariants.
///
/// The merge rule cannot produce this from well-formed input, so seeing one
/// means the inputs themselves were inconsistent.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("merge conflict at {path}:{line}: {reason}")]
pub struct MergeConflict {
    pub path: SourcePath,
    pub line: Line,
    pub reason: String,
}

/// Fold a sequence of records into per-file coverage, consuming it once.
pub fn merge(records: impl IntoIterator<Item = CoverageRecord>) -> SourceCoverage {
    let mut coverage = SourceCoverage::default();

    for record in records {
        coverage.record(&record);
    }

    coverage
}

/// Merge target shared by concurrent report workers.
///
/// Each file has its own lock, so workers merging disjoint files never
/// contend. The outer lock is only taken for writing when a file is seen for
/// the first time.
#[derive(Debug, Default)]
pub struct SharedCoverage {
    files: RwLock<BTreeMap<SourcePath, Arc<Mutex<FileCoverage>>>>,
}

impl SharedCoverage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a worker's local coverage into the shared map.
    ///
    /// On conflict the merge into that file is rolled back and the remaining
    /// files are still merged; the first conflict is returned.
    pub fn absorb(&self, coverage: SourceCoverage) -> Result<(), MergeConflict> {
        let mut first_conflict = None;

        for (path, file) in coverage.files {
            let slot = self.slot(&path);

            let mut guard = match slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };

            let mut merged = guard.clone();
            merged.merge(&file);

            match check_file(&path, &merged) {
                Ok(()) => *guard = merged,
                Err(conflict) => {
                    warn!("{}", conflict);
                    first_conflict.get_or_insert(conflict);
                }
            }
        }

        match first_conflict {
            Some(conflict) => Err(conflict),
            None => Ok(()),
        }
    }

    pub fn file_count(&self) -> usize {
        match self.files.read() {
            Ok(files) => files.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Snapshot the merged coverage.
    pub fn snapshot(&self) -> SourceCoverage {
        let files = match self.files.read() {
            Ok(files) => files,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut coverage = SourceCoverage::default();

        for (path, slot) in files.iter() {
            let file = match slot.lock() {
                Ok(file) => file.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            };
            coverage.files.insert(path.clone(), file);
        }

        coverage
    }

    pub fn into_inner(self) -> SourceCoverage {
        self.snapshot()
    }

    fn slot(&self, path: &SourcePath) -> Arc<Mutex<FileCoverage>> {
        {
            let files = match self.files.read() {
                Ok(files) => files,
                Err(poisoned) => poisoned.into_inner(),
            };

            if let Some(slot) = files.get(path) {
                return slot.clone();
            }
        }

        let mut files = match self.files.write() {
            Ok(files) => files,
            Err(poisoned) => poisoned.into_inner(),
        };

        files.entry(path.clone()).or_default().clone()
    }
}

fn check_file(path: &SourcePath, file: &FileCoverage) -> Result<(), MergeConflict> {
    for (line, coverage) in &file.lines {
        if !coverage.is_consistent() {
            return Err(MergeConflict {
                path: path.clone(),
                line: *line,
                reason: format!(
                    "execution count {:?} on a line marked unhit",
                    coverage.count
                ),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests;
