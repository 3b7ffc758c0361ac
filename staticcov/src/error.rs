// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use static_analysis::RegistryError;
use thiserror::Error;

/// Failures that end a run. Per-file and per-stream problems are reported
/// in the run summary instead.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("unable to initialize grammars")]
    Registry(#[from] RegistryError),

    #[error("no coverage reports found")]
    NoReportsFound,

    #[error("unable to serialize upload payload")]
    Payload(#[from] serde_json::Error),

    #[error("run cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
