// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod allowlist;
pub mod merge;
pub mod path;
pub mod source;

pub use merge::{merge, MergeConflict, SharedCoverage};
pub use path::SourcePath;
pub use source::{
    BranchId, Conditions, CoverageRecord, FileCoverage, Hits, Line, LineCoverage, SourceCoverage,
};
