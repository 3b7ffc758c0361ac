// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use coverage::allowlist::PathFilter;
use coverage::{SharedCoverage, SourceCoverage};
use coverage_format::{MalformedPolicy, ReportFormat, StreamStats};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{spawn_blocking, JoinSet};
use tokio_util::sync::CancellationToken;

/// One coverage report, as an already-opened byte stream.
pub struct ReportInput {
    pub name: String,

    /// Skips format sniffing when set.
    pub format: Option<ReportFormat>,
    pub reader: Box<dyn Read + Send>,
}

impl ReportInput {
    pub fn new(name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: name.into(),
            format: None,
            reader: Box::new(reader),
        }
    }

    pub fn with_format(mut self, format: ReportFormat) -> Self {
        self.format = Some(format);
        self
    }
}

impl fmt::Debug for ReportInput {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ReportInput")
            .field("name", &self.name)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StreamOutcome {
    Merged,

    /// The stream was abandoned and contributed nothing.
    Aborted { error: String },

    /// Merging into the shared coverage was refused for some files.
    Conflict { error: String },
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ReportFormat>,
    pub records: u64,
    pub malformed: u64,

    /// Records dropped by the path filter.
    pub filtered: u64,
    pub outcome: StreamOutcome,
}

#[derive(Debug, Default)]
pub struct IngestResults {
    pub coverage: SourceCoverage,

    /// In input order.
    pub streams: Vec<StreamSummary>,
}

/// Parse every report on a bounded pool of blocking workers and merge the
/// survivors into one coverage map.
///
/// Each stream is parsed into worker-local coverage first, so a stream that
/// is later aborted leaves the shared map untouched.
pub async fn ingest_reports(
    inputs: Vec<ReportInput>,
    filter: Arc<PathFilter>,
    policy: MalformedPolicy,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<IngestResults> {
    let shared = Arc::new(SharedCoverage::new());
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let count = inputs.len();

    for (index, input) in inputs.into_iter().enumerate() {
        tasks.spawn(ingest_task(
            index,
            input,
            shared.clone(),
            filter.clone(),
            policy,
            semaphore.clone(),
            cancel.clone(),
        ));
    }

    let mut streams: Vec<Option<StreamSummary>> = vec![None; count];

    while let Some(joined) = tasks.join_next().await {
        let (index, summary) = joined.context("ingestion task failed")??;
        streams[index] = Some(summary);
    }

    let streams: Vec<StreamSummary> = streams.into_iter().flatten().collect();

    let merged = streams
        .iter()
        .filter(|s| s.outcome == StreamOutcome::Merged)
        .count();
    info!("merged {} of {} report streams", merged, streams.len());

    Ok(IngestResults {
        coverage: shared.snapshot(),
        streams,
    })
}

async fn ingest_task(
    index: usize,
    input: ReportInput,
    shared: Arc<SharedCoverage>,
    filter: Arc<PathFilter>,
    policy: MalformedPolicy,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) -> Result<(usize, StreamSummary)> {
    let permit = tokio::select! {
        biased;

        _ = cancel.cancelled() => None,
        permit = semaphore.acquire_owned() => Some(permit),
    };

    let _permit = match permit {
        Some(permit) => permit.context("ingestion worker pool closed")?,
        None => return Ok((index, cancelled(&input))),
    };

    let summary = spawn_blocking(move || ingest_stream(input, &shared, &filter, policy, &cancel))
        .await
        .context("ingestion worker panicked")?;

    Ok((index, summary))
}

fn cancelled(input: &ReportInput) -> StreamSummary {
    StreamSummary {
        name: input.name.clone(),
        format: input.format,
        records: 0,
        malformed: 0,
        filtered: 0,
        outcome: StreamOutcome::Cancelled,
    }
}

fn ingest_stream(
    input: ReportInput,
    shared: &SharedCoverage,
    filter: &PathFilter,
    policy: MalformedPolicy,
    cancel: &CancellationToken,
) -> StreamSummary {
    let ReportInput {
        name,
        format,
        reader,
    } = input;

    let mut summary = StreamSummary {
        name,
        format,
        records: 0,
        malformed: 0,
        filtered: 0,
        outcome: StreamOutcome::Merged,
    };

    if cancel.is_cancelled() {
        summary.outcome = StreamOutcome::Cancelled;
        return summary;
    }

    let mut stream = match coverage_format::open(reader, format, policy) {
        Ok(stream) => stream,
        Err(err) => {
            warn!("unable to open report {}: {}", summary.name, err);
            summary.outcome = StreamOutcome::Aborted {
                error: err.to_string(),
            };
            return summary;
        }
    };

    summary.format = Some(stream.format());

    let mut local = SourceCoverage::default();
    let mut failure = None;

    for item in &mut stream {
        if cancel.is_cancelled() {
            summary.outcome = StreamOutcome::Cancelled;
            break;
        }

        match item {
            Ok(record) if filter.is_allowed(&record.path) => local.record(&record),
            Ok(_) => summary.filtered += 1,
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    let StreamStats { records, malformed } = stream.stats();
    summary.records = records;
    summary.malformed = malformed;

    if let Some(err) = failure {
        warn!("abandoning report {}: {}", summary.name, err);
        summary.outcome = StreamOutcome::Aborted {
            error: err.to_string(),
        };
        return summary;
    }

    if summary.outcome == StreamOutcome::Cancelled {
        return summary;
    }

    debug!(
        "report {}: {} records, {} malformed, {} filtered",
        summary.name, records, malformed, summary.filtered
    );

    if let Err(conflict) = shared.absorb(local) {
        summary.outcome = StreamOutcome::Conflict {
            error: conflict.to_string(),
        };
    }

    summary
}
