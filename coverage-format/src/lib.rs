// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod cobertura;
pub mod error;
pub mod format;
pub mod lcov;
pub mod stream;

pub use error::ReportError;
pub use format::{sniff, ReportFormat, SNIFF_PREFIX_LEN};
pub use stream::{open, MalformedGuard, MalformedPolicy, RecordStream, StreamStats};
