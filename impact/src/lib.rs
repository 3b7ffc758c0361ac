// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod diff;
pub mod engine;
pub mod label;

pub use diff::{parse_unified_diff, ChangeSet, DiffHunk, LineRange};
pub use engine::{impact, impact_with_history, FactIndex, ImpactReason, ImpactSet, ImpactedLabel};
pub use label::{map_labels, summarize, CoverageTotals, LabelCoverage};
