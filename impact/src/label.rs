// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use coverage::{FileCoverage, Line};
use serde::{Deserialize, Serialize};
use static_analysis::{LabelId, LabelKind, StructuralFact};

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LabelCoverage {
    pub label: LabelId,
    pub kind: LabelKind,

    /// Instrumented lines inside the label's range.
    pub executable_lines: u32,
    pub hit_lines: u32,

    /// `None` when nothing in the label is executable: untestable, as
    /// opposed to untested.
    pub ratio: Option<f64>,
}

impl LabelCoverage {
    pub fn is_untestable(&self) -> bool {
        self.executable_lines == 0
    }

    pub fn is_fully_covered(&self) -> bool {
        self.executable_lines > 0 && self.hit_lines == self.executable_lines
    }
}

/// Combine one file's facts with its merged coverage, in fact order.
///
/// With no coverage for the file, every label has zero executable lines.
pub fn map_labels(facts: &[StructuralFact], coverage: Option<&FileCoverage>) -> Vec<LabelCoverage> {
    facts
        .iter()
        .map(|fact| {
            let (executable_lines, hit_lines) = match coverage {
                Some(coverage) => count_lines(fact.start_line, fact.end_line, coverage),
                None => (0, 0),
            };

            let ratio = match executable_lines {
                0 => None,
                n => Some(f64::from(hit_lines) / f64::from(n)),
            };

            LabelCoverage {
                label: fact.label.clone(),
                kind: fact.kind,
                executable_lines,
                hit_lines,
                ratio,
            }
        })
        .collect()
}

fn count_lines(start: Line, end: Line, coverage: &FileCoverage) -> (u32, u32) {
    let mut executable = 0;
    let mut hit = 0;

    for line in coverage.lines.range(start..=end).map(|(_, line)| line) {
        executable += 1;

        if line.hit {
            hit += 1;
        }
    }

    (executable, hit)
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct CoverageTotals {
    pub labels: usize,
    pub untestable: usize,
    pub fully_covered: usize,
    pub executable_lines: u64,
    pub hit_lines: u64,
}

impl CoverageTotals {
    pub fn ratio(&self) -> Option<f64> {
        match self.executable_lines {
            0 => None,
            n => Some(self.hit_lines as f64 / n as f64),
        }
    }
}

/// Aggregate over labels. Line totals double count nested labels, so they
/// describe label coverage, not file coverage.
pub fn summarize(labels: &[LabelCoverage]) -> CoverageTotals {
    let mut totals = CoverageTotals::default();

    for label in labels {
        totals.labels += 1;
        totals.executable_lines += u64::from(label.executable_lines);
        totals.hit_lines += u64::from(label.hit_lines);

        if label.is_untestable() {
            totals.untestable += 1;
        }

        if label.is_fully_covered() {
            totals.fully_covered += 1;
        }
    }

    totals
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use coverage::{CoverageRecord, Hits, SourcePath};
    use pretty_assertions::assert_eq;

    use super::*;

    fn fact(label: &str, kind: LabelKind, start: u32, end: u32) -> Result<StructuralFact> {
        let path = SourcePath::new("m.py")?;
        Ok(StructuralFact {
            path: path.clone(),
            label: LabelId::new(&path, kind, &[label.to_owned()], 0),
            kind,
            name: label.to_owned(),
            scope: vec![],
            start_line: Line::new(start)?,
            end_line: Line::new(end)?,
            parent: None,
        })
    }

    fn file_coverage(lines: &[(u32, bool)]) -> Result<FileCoverage> {
        let path = SourcePath::new("m.py")?;
        let mut coverage = FileCoverage::default();

        for (line, hit) in lines {
            coverage.record(&CoverageRecord::line(
                path.clone(),
                Line::new(*line)?,
                Hits::Covered(*hit),
            ));
        }

        Ok(coverage)
    }

    #[test]
    fn test_executable_and_hit_lines() -> Result<()> {
        let facts = vec![
            fact("f", LabelKind::Function, 1, 6)?,
            fact("g", LabelKind::Function, 8, 9)?,
            fact("Proto", LabelKind::Class, 11, 14)?,
        ];

        // Lines 2, 3, 5 instrumented in f; 8 and 9 in g; nothing in Proto.
        let coverage = file_coverage(&[(2, true), (3, false), (5, true), (8, true), (9, true)])?;
        let labels = map_labels(&facts, Some(&coverage));

        assert_eq!(labels[0].executable_lines, 3);
        assert_eq!(labels[0].hit_lines, 2);
        assert_eq!(labels[0].ratio, Some(2.0 / 3.0));

        assert_eq!(labels[1].ratio, Some(1.0));
        assert!(labels[1].is_fully_covered());

        // Untestable, not untested.
        assert_eq!(labels[2].ratio, None);
        assert!(labels[2].is_untestable());

        Ok(())
    }

    #[test]
    fn test_missing_file_coverage() -> Result<()> {
        let facts = vec![fact("f", LabelKind::Function, 1, 3)?];
        let labels = map_labels(&facts, None);

        assert_eq!(labels[0].executable_lines, 0);
        assert_eq!(labels[0].ratio, None);

        Ok(())
    }

    #[test]
    fn test_all_hit_report_is_fully_covered() -> Result<()> {
        let facts = vec![
            fact("a", LabelKind::Function, 1, 4)?,
            fact("b", LabelKind::Statement, 2, 2)?,
            fact("c", LabelKind::Function, 5, 10)?,
        ];
        let all: Vec<_> = (1..=10).map(|line| (line, true)).collect();
        let labels = map_labels(&facts, Some(&file_coverage(&all)?));

        assert!(labels.iter().all(|label| label.ratio == Some(1.0)));

        Ok(())
    }

    #[test]
    fn test_summarize() -> Result<()> {
        let facts = vec![
            fact("f", LabelKind::Function, 1, 2)?,
            fact("g", LabelKind::Function, 3, 4)?,
            fact("h", LabelKind::Function, 5, 6)?,
        ];
        let coverage = file_coverage(&[(1, true), (2, true), (3, false)])?;
        let totals = summarize(&map_labels(&facts, Some(&coverage)));

        assert_eq!(
            totals,
            CoverageTotals {
                labels: 3,
                untestable: 1,
                fully_covered: 1,
                executable_lines: 3,
                hit_lines: 2,
            }
        );
        assert_eq!(totals.ratio(), Some(2.0 / 3.0));

        Ok(())
    }
}
