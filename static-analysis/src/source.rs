// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use coverage::SourcePath;
use sha2::{Digest, Sha256};

use crate::language::Language;

/// Bytes of one source file as handed to the analyzer.
#[derive(Clone, Debug)]
pub struct SourceFile {
    path: SourcePath,
    language: Option<Language>,
    content: Arc<[u8]>,
    hash: String,
}

impl SourceFile {
    pub fn new(path: SourcePath, content: impl Into<Arc<[u8]>>, hint: Option<&str>) -> Self {
        let content = content.into();
        let language = Language::detect(&path, hint);
        let hash = digest(&content);

        Self {
            path,
            language,
            content,
            hash,
        }
    }

    pub fn path(&self) -> &SourcePath {
        &self.path
    }

    /// `None` when no bundled grammar handles this file.
    pub fn language(&self) -> Option<Language> {
        self.language
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Hex SHA-256 of the content.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn line_count(&self) -> u32 {
        line_count(&self.content)
    }
}

pub fn digest(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

pub(crate) fn line_count(content: &[u8]) -> u32 {
    let newlines = content.iter().filter(|b| **b == b'\n').count();

    let lines = match content.last() {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    };

    u32::try_from(lines).unwrap_or(u32::MAX)
}
