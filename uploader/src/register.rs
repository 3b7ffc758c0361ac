// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Content hash of one analyzed file, offered before any upload.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FileDigest {
    pub path: String,
    pub content_hash: String,
}

impl FileDigest {
    pub fn new(path: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_hash: content_hash.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// New to the collector. Its facts must be sent.
    Created,

    /// Already held with the same content hash.
    Valid,
}

/// The collector's answer for one offered file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FileRegistration {
    pub path: String,
    pub state: FileState,
}

/// Which offered files go into the upload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegisteredFiles {
    pub upload: BTreeSet<String>,

    /// Files the collector already holds.
    pub unchanged: BTreeSet<String>,
}

impl RegisteredFiles {
    /// Sort offered files by the collector's answers. A file the collector
    /// did not answer for is uploaded. With `force`, everything is.
    pub fn resolve(offered: &[FileDigest], answers: &[FileRegistration], force: bool) -> Self {
        let valid: BTreeSet<&str> = answers
            .iter()
            .filter(|answer| answer.state == FileState::Valid)
            .map(|answer| answer.path.as_str())
            .collect();

        for answer in answers {
            if !offered.iter().any(|file| file.path == answer.path) {
                warn!("collector answered for unknown file {}", answer.path);
            }
        }

        let mut files = Self::default();

        for file in offered {
            if !force && valid.contains(file.path.as_str()) {
                files.unchanged.insert(file.path.clone());
            } else {
                files.upload.insert(file.path.clone());
            }
        }

        files
    }

    pub fn should_upload(&self, path: &str) -> bool {
        self.upload.contains(path)
    }
}
