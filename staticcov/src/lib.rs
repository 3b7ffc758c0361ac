// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod analysis;
pub mod config;
pub mod error;
pub mod ingest;
pub mod payload;
pub mod run;

pub use analysis::{analyze_sources, AnalysisResults, SkipReason, SourceInput};
pub use config::{RunConfig, UploadConfig, UploadMetadata};
pub use error::RunError;
pub use ingest::{ingest_reports, IngestResults, ReportInput, StreamOutcome, StreamSummary};
pub use payload::{FilePayload, Payload};
pub use run::{Run, RunInputs, RunSummary};
