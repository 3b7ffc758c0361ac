// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// Default upper bound on the size of one chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// 0-based position in the payload.
    pub index: usize,
    pub total: usize,
    pub data: Bytes,

    /// Hex SHA-256 of `data`.
    pub digest: String,
}

impl Chunk {
    fn new(index: usize, total: usize, data: Bytes) -> Self {
        let digest = hex::encode(Sha256::digest(&data));

        Self {
            index,
            total,
            data,
            digest,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Split a payload at fixed `chunk_size` boundaries, preserving order.
///
/// An empty payload still produces one (empty) chunk, so the receiver
/// always sees an upload.
pub fn split_chunks(payload: impl Into<Bytes>, chunk_size: usize) -> Vec<Chunk> {
    let payload = payload.into();
    let chunk_size = chunk_size.max(1);

    if payload.is_empty() {
        return vec![Chunk::new(0, 1, payload)];
    }

    let total = payload.len().div_ceil(chunk_size);

    (0..total)
        .map(|index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(payload.len());
            Chunk::new(index, total, payload.slice(start..end))
        })
        .collect()
}
