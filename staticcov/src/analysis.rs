// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use coverage::allowlist::PathFilter;
use coverage::SourcePath;
use serde::Serialize;
use static_analysis::{FileFacts, GrammarRegistry, ParseOutcome, SourceFile};
use tokio::sync::Semaphore;
use tokio::task::{spawn_blocking, JoinSet};
use tokio_util::sync::CancellationToken;

/// Source bytes handed to the run by whoever enumerated the project.
#[derive(Clone, Debug)]
pub struct SourceInput {
    pub path: String,
    pub content: Arc<[u8]>,
    pub language_hint: Option<String>,
}

impl SourceInput {
    pub fn new(path: impl Into<String>, content: impl Into<Arc<[u8]>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            language_hint: None,
        }
    }

    pub fn with_language(mut self, hint: impl Into<String>) -> Self {
        self.language_hint = Some(hint.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    TooLarge { size: u64, limit: u64 },
    Filtered,
    InvalidPath { error: String },

    /// Another input already claimed the same canonical path.
    Duplicate,
    Unsupported,
    ParseFailed { diagnostic: String },
    Cancelled,
}

#[derive(Debug, Default)]
pub struct AnalysisResults {
    pub files: BTreeMap<SourcePath, FileFacts>,

    /// Keyed by the path as supplied, since skipped paths may not be valid.
    pub skipped: BTreeMap<String, SkipReason>,
}

impl AnalysisResults {
    fn skip(&mut self, path: String, reason: SkipReason) {
        debug!("skipping {}: {:?}", path, reason);
        self.skipped.insert(path, reason);
    }
}

enum FileOutcome {
    Analyzed(FileFacts),
    Skipped(SkipReason),
}

/// Parse and extract every input on a bounded pool of blocking workers.
///
/// Results are keyed by path, so they do not depend on which worker
/// finished first. Inputs not yet started when `cancel` fires are skipped as
/// cancelled.
pub async fn analyze_sources(
    registry: Arc<GrammarRegistry>,
    inputs: Vec<SourceInput>,
    filter: Arc<PathFilter>,
    workers: usize,
    max_file_size: u64,
    cancel: &CancellationToken,
) -> Result<AnalysisResults> {
    let mut results = AnalysisResults::default();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut claimed = BTreeSet::new();

    for input in inputs {
        let size = input.content.len() as u64;

        if size > max_file_size {
            results.skip(
                input.path,
                SkipReason::TooLarge {
                    size,
                    limit: max_file_size,
                },
            );
            continue;
        }

        let path = match SourcePath::new(&input.path) {
            Ok(path) => path,
            Err(err) => {
                let error = format!("{err:#}");
                results.skip(input.path, SkipReason::InvalidPath { error });
                continue;
            }
        };

        if !filter.is_allowed(&path) {
            results.skip(input.path, SkipReason::Filtered);
            continue;
        }

        if !claimed.insert(path.clone()) {
            results.skip(input.path, SkipReason::Duplicate);
            continue;
        }

        tasks.spawn(analyze_task(
            registry.clone(),
            semaphore.clone(),
            cancel.clone(),
            input,
            path,
        ));
    }

    while let Some(joined) = tasks.join_next().await {
        let (raw, path, outcome) = joined.context("analysis task failed")??;

        match outcome {
            FileOutcome::Analyzed(facts) => {
                results.files.insert(path, facts);
            }
            FileOutcome::Skipped(reason) => results.skip(raw, reason),
        }
    }

    info!(
        "analyzed {} source files, skipped {}",
        results.files.len(),
        results.skipped.len()
    );

    Ok(results)
}

async fn analyze_task(
    registry: Arc<GrammarRegistry>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    input: SourceInput,
    path: SourcePath,
) -> Result<(String, SourcePath, FileOutcome)> {
    let permit = tokio::select! {
        biased;

        _ = cancel.cancelled() => None,
        permit = semaphore.acquire_owned() => Some(permit),
    };

    let _permit = match permit {
        Some(permit) => permit.context("analysis worker pool closed")?,
        None => return Ok((input.path, path, FileOutcome::Skipped(SkipReason::Cancelled))),
    };

    if cancel.is_cancelled() {
        return Ok((input.path, path, FileOutcome::Skipped(SkipReason::Cancelled)));
    }

    let SourceInput {
        path: raw,
        content,
        language_hint,
    } = input;
    let canonical = path.clone();

    let outcome = spawn_blocking(move || {
        let file = SourceFile::new(canonical, content, language_hint.as_deref());
        analyze_file(&registry, &file)
    })
    .await
    .context("analysis worker panicked")?;

    Ok((raw, path, outcome))
}

fn analyze_file(registry: &GrammarRegistry, file: &SourceFile) -> FileOutcome {
    match registry.parse(file) {
        ParseOutcome::Parsed(tree) => {
            if tree.has_errors() {
                debug!("{} parsed with errors, extracting what is valid", file.path());
            }

            FileOutcome::Analyzed(FileFacts::new(file, &tree))
        }
        ParseOutcome::Unsupported => FileOutcome::Skipped(SkipReason::Unsupported),
        ParseOutcome::Failed(failure) => {
            warn!("{}", failure);
            FileOutcome::Skipped(SkipReason::ParseFailed {
                diagnostic: failure.diagnostic,
            })
        }
    }
}
