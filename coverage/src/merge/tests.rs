// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;
use crate::source::{BranchId, Conditions, Hits, LineCoverage};

const FILES: [&str; 3] = ["src/a.py", "src/b.py", "lib/c.js"];

fn record(file: &str, line: u32, hits: Hits) -> CoverageRecord {
    CoverageRecord::line(
        SourcePath::new(file).unwrap(),
        Line::new(line).unwrap(),
        hits,
    )
}

fn arb_record() -> impl Strategy<Value = CoverageRecord> {
    let hits = prop_oneof![
        (0u64..5).prop_map(Hits::Count),
        any::<bool>().prop_map(Hits::Covered),
    ];
    let branch = prop::option::of((0u32..3).prop_map(|b| BranchId(format!("0.{b}"))));
    let conditions = prop::option::of((0u32..4, 0u32..4).prop_map(|(covered, total)| {
        Conditions { covered, total }
    }));

    (0usize..FILES.len(), 1u32..12, hits, branch, conditions).prop_map(
        |(file, line, hits, branch, conditions)| CoverageRecord {
            path: SourcePath::new(FILES[file]).unwrap(),
            line: Line::new(line).unwrap(),
            hits,
            branch,
            conditions,
        },
    )
}

proptest! {
    #[test]
    fn merge_is_order_independent(
        records in prop::collection::vec(arb_record(), 0..64),
        seed in any::<u64>(),
    ) {
        let forward = merge(records.clone());
        let backward = merge(records.iter().rev().cloned());

        // Deterministic shuffle driven by the seed.
        let mut shuffled = records.clone();
        let mut state = seed | 1;
        for i in (1..shuffled.len()).rev() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let j = (state % (i as u64 + 1)) as usize;
            shuffled.swap(i, j);
        }
        let permuted = merge(shuffled);

        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(&forward, &permuted);
    }

    #[test]
    fn merge_is_associative_across_streams(
        records in prop::collection::vec(arb_record(), 0..64),
        split in 0usize..64,
    ) {
        let split = split.min(records.len());
        let (lhs, rhs) = records.split_at(split);

        let whole = merge(records.clone());

        let mut left_first = merge(lhs.to_vec());
        left_first.absorb(merge(rhs.to_vec()));

        let mut right_first = merge(rhs.to_vec());
        right_first.absorb(merge(lhs.to_vec()));

        prop_assert_eq!(&whole, &left_first);
        prop_assert_eq!(&whole, &right_first);
    }
}

#[test]
fn test_duplicate_line_stays_hit() -> Result<()> {
    let coverage = merge(vec![
        record("src/a.py", 5, Hits::Covered(true)),
        record("src/a.py", 5, Hits::Covered(false)),
    ]);

    let path = SourcePath::new("src/a.py")?;
    assert_eq!(coverage.files[&path].is_hit(Line::new(5)?), Some(true));

    Ok(())
}

#[test]
fn test_shared_coverage_from_threads() -> Result<()> {
    let shared = Arc::new(SharedCoverage::new());

    let workers: Vec<_> = (0..4u32)
        .map(|worker| {
            let shared = shared.clone();
            thread::spawn(move || {
                let records = (1..=10).map(|line| {
                    let hits = if line % 4 == worker { 1 } else { 0 };
                    record(FILES[(line % 3) as usize], line, Hits::Count(hits))
                });
                shared.absorb(merge(records))
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked")?;
    }

    let expected = merge((0..4u32).flat_map(|worker| {
        (1..=10).map(move |line| {
            let hits = if line % 4 == worker { 1 } else { 0 };
            record(FILES[(line % 3) as usize], line, Hits::Count(hits))
        })
    }));

    assert_eq!(shared.file_count(), 3);
    assert_eq!(shared.snapshot(), expected);

    Ok(())
}

#[test]
fn test_inconsistent_input_is_a_conflict() -> Result<()> {
    let path = SourcePath::new("src/a.py")?;
    let shared = SharedCoverage::new();

    shared.absorb(merge(vec![record("src/a.py", 1, Hits::Count(1))]))?;

    let mut corrupt = SourceCoverage::default();
    let file = corrupt.files.entry(path.clone()).or_default();
    file.lines.insert(
        Line::new(2)?,
        LineCoverage {
            hit: false,
            count: Some(3),
            ..LineCoverage::default()
        },
    );

    let err = shared.absorb(corrupt).unwrap_err();
    assert_eq!(err.path, path);
    assert_eq!(err.line, Line::new(2)?);

    // The rejected merge left the file untouched.
    let snapshot = shared.into_inner();
    assert_eq!(snapshot.files[&path].lines.len(), 1);

    Ok(())
}
