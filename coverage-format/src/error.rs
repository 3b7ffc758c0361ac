// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    /// Neither a declared format nor the sniffed prefix identified the report.
    #[error("unable to detect report format from the first {0} bytes")]
    UnknownFormat(usize),

    #[error("unknown report format name: {0}")]
    UnknownFormatName(String),

    /// The stream was abandoned: too much of it did not parse.
    #[error("malformed report: {reason} ({malformed} of {seen} records malformed)")]
    Malformed {
        reason: String,
        malformed: u64,
        seen: u64,
    },

    #[error("error reading report")]
    Io(#[from] io::Error),
}

impl ReportError {
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}
