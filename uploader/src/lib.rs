// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod chunk;
pub mod coordinator;
pub mod register;
pub mod transport;

pub use chunk::{split_chunks, Chunk};
pub use coordinator::{ChunkReport, ChunkStatus, UploadCoordinator, UploadOutcome, UploadReport};
pub use register::{FileDigest, FileRegistration, FileState, RegisteredFiles};
pub use reqwest_retry::{AttemptError, RetryPolicy};
pub use transport::{Ack, HttpTransport, Transport};
