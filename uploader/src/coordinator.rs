// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use reqwest_retry::{retry, RetryPolicy, SendError};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::chunk::{split_chunks, Chunk, DEFAULT_CHUNK_SIZE};
use crate::register::{FileDigest, RegisteredFiles};
use crate::transport::Transport;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChunkStatus {
    Acked {
        attempts: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        receipt: Option<String>,
    },
    Failed {
        attempts: usize,
        transient: bool,
        error: String,
    },
    Cancelled {
        attempts: usize,
    },

    /// Not attempted because an earlier chunk failed.
    NotSent,
}

impl ChunkStatus {
    pub fn is_acked(&self) -> bool {
        matches!(self, Self::Acked { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkReport {
    pub index: usize,
    pub size: usize,
    pub digest: String,
    pub status: ChunkStatus,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Every chunk was acknowledged and the upload was finalized.
    Acked,
    TransientFailure,
    PermanentFailure,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub chunks: Vec<ChunkReport>,
    pub outcome: UploadOutcome,
    pub finished: bool,
}

impl UploadReport {
    pub fn acked_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.status.is_acked()).count()
    }

    /// Failed overall, but some chunks made it. The caller decides whether
    /// that is good enough.
    pub fn is_partial_success(&self) -> bool {
        self.outcome != UploadOutcome::Acked && self.acked_chunks() > 0
    }
}

/// Sends a payload as ordered chunks, retrying each one per policy.
pub struct UploadCoordinator<T> {
    transport: T,
    policy: RetryPolicy,
    chunk_size: usize,
}

impl<T: Transport> UploadCoordinator<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            policy: RetryPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Offer file hashes and learn which files the collector still needs.
    ///
    /// On failure nothing was uploaded, and the returned report says why.
    pub async fn register(
        &self,
        files: &[FileDigest],
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<RegisteredFiles, UploadReport> {
        match retry(&self.policy, cancel, || self.transport.register(files)).await {
            Ok(answers) => {
                let registered = RegisteredFiles::resolve(files, &answers, force);
                info!(
                    "{} of {} files need uploading",
                    registered.upload.len(),
                    files.len()
                );
                Ok(registered)
            }
            Err(err) => {
                warn!("unable to register files: {}", err);
                Err(UploadReport {
                    chunks: vec![],
                    outcome: outcome_of(&err),
                    finished: false,
                })
            }
        }
    }

    /// Upload `payload`. Never fails outright: the report says how far it got.
    ///
    /// Chunks go out strictly in order. The first chunk that cannot be
    /// delivered stops the upload; later chunks are reported as not sent.
    pub async fn send(
        &self,
        payload: impl Into<Bytes>,
        cancel: &CancellationToken,
    ) -> UploadReport {
        let chunks = split_chunks(payload, self.chunk_size);
        let total = chunks.len();

        let mut reports: Vec<ChunkReport> = chunks
            .iter()
            .map(|chunk| ChunkReport {
                index: chunk.index,
                size: chunk.len(),
                digest: chunk.digest.clone(),
                status: ChunkStatus::NotSent,
            })
            .collect();

        for (chunk, report) in chunks.iter().zip(reports.iter_mut()) {
            match self.put_chunk(chunk, cancel).await {
                Ok(status) => report.status = status,
                Err((status, outcome)) => {
                    report.status = status;

                    return UploadReport {
                        chunks: reports,
                        outcome,
                        finished: false,
                    };
                }
            }
        }

        let finish = retry(&self.policy, cancel, || self.transport.finish(total)).await;

        let outcome = match finish {
            Ok(()) => {
                info!("upload of {} chunks finished", total);
                UploadOutcome::Acked
            }
            Err(err) => {
                warn!("unable to finish upload: {}", err);
                outcome_of(&err)
            }
        };

        UploadReport {
            chunks: reports,
            outcome,
            finished: outcome == UploadOutcome::Acked,
        }
    }

    async fn put_chunk(
        &self,
        chunk: &Chunk,
        cancel: &CancellationToken,
    ) -> Result<ChunkStatus, (ChunkStatus, UploadOutcome)> {
        let attempts = AtomicUsize::new(0);

        let result = retry(&self.policy, cancel, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            self.transport.put_chunk(chunk)
        })
        .await;

        match result {
            Ok(ack) => {
                let attempts = attempts.into_inner();
                debug!(
                    "chunk {}/{} acked after {} attempts",
                    chunk.index + 1,
                    chunk.total,
                    attempts
                );
                Ok(ChunkStatus::Acked {
                    attempts,
                    receipt: ack.receipt,
                })
            }
            Err(err) => {
                warn!("chunk {}/{} failed: {}", chunk.index + 1, chunk.total, err);

                let outcome = outcome_of(&err);
                let status = match err {
                    SendError::Cancelled { attempts } => ChunkStatus::Cancelled { attempts },
                    SendError::Transient { attempts, source } => ChunkStatus::Failed {
                        attempts,
                        transient: true,
                        error: format!("{source:#}"),
                    },
                    SendError::Permanent { attempts, source } => ChunkStatus::Failed {
                        attempts,
                        transient: false,
                        error: format!("{source:#}"),
                    },
                };

                Err((status, outcome))
            }
        }
    }
}

fn outcome_of(err: &SendError) -> UploadOutcome {
    match err {
        SendError::Transient { .. } => UploadOutcome::TransientFailure,
        SendError::Permanent { .. } => UploadOutcome::PermanentFailure,
        SendError::Cancelled { .. } => UploadOutcome::Cancelled,
    }
}
