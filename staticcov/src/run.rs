// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::sync::Arc;

use coverage::allowlist::PathFilter;
use coverage::SourcePath;
use impact::{impact_with_history, ChangeSet, CoverageTotals, FactIndex};
use serde::Serialize;
use static_analysis::source::digest;
use static_analysis::GrammarRegistry;
use tokio_util::sync::CancellationToken;
use uploader::{Transport, UploadCoordinator, UploadOutcome, UploadReport};

use crate::analysis::{analyze_sources, AnalysisResults, SkipReason, SourceInput};
use crate::config::RunConfig;
use crate::error::RunError;
use crate::ingest::{ingest_reports, ReportInput, StreamSummary};
use crate::payload::Payload;

#[derive(Debug, Default)]
pub struct RunInputs {
    pub sources: Vec<SourceInput>,
    pub reports: Vec<ReportInput>,

    /// Enables impact analysis.
    pub changes: Option<ChangeSet>,

    /// Sources at the base revision. Only needed to place removed lines.
    pub base_sources: Vec<SourceInput>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub analyzed: Vec<SourcePath>,
    pub skipped: BTreeMap<String, SkipReason>,
    pub streams: Vec<StreamSummary>,
    pub totals: CoverageTotals,

    /// Files left out of the upload because the collector already holds
    /// their content.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unchanged: Vec<SourcePath>,

    /// Number of impacted labels, when a change set was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impacted: Option<usize>,

    pub payload_size: usize,
    pub payload_digest: String,

    /// Absent on dry runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadReport>,
}

impl RunSummary {
    pub fn upload_succeeded(&self) -> bool {
        matches!(&self.upload, Some(report) if report.outcome == UploadOutcome::Acked)
    }
}

/// One analysis-and-upload run.
///
/// Grammars and path rules are checked when the run is built, so a bad
/// setup fails before any input is touched.
///
/// Before uploading, file hashes are registered with the collector. Files it
/// already holds are left out of the payload unless `upload.force` is set.
pub struct Run<T> {
    config: RunConfig,
    registry: Arc<GrammarRegistry>,
    filter: Arc<PathFilter>,
    coordinator: UploadCoordinator<T>,
}

impl<T: Transport> Run<T> {
    pub fn new(config: RunConfig, transport: T) -> Result<Self, RunError> {
        let registry = Arc::new(GrammarRegistry::new()?);
        Self::with_registry(config, registry, transport)
    }

    /// Reuse grammars that were already loaded.
    pub fn with_registry(
        config: RunConfig,
        registry: Arc<GrammarRegistry>,
        transport: T,
    ) -> Result<Self, RunError> {
        let filter = Arc::new(config.path_filter()?);

        let coordinator = UploadCoordinator::new(transport)
            .with_policy(config.upload.retry_policy())
            .with_chunk_size(config.upload.chunk_size());

        Ok(Self {
            config,
            registry,
            filter,
            coordinator,
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub async fn execute(
        &self,
        inputs: RunInputs,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, RunError> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        if inputs.reports.is_empty() {
            if !self.config.handle_no_reports_found {
                return Err(RunError::NoReportsFound);
            }

            info!("no coverage reports found, continuing without coverage");
        }

        let workers = self.config.workers();

        let (analysis, ingest) = tokio::join!(
            analyze_sources(
                self.registry.clone(),
                inputs.sources,
                self.filter.clone(),
                workers,
                self.config.max_file_size(),
                cancel,
            ),
            ingest_reports(
                inputs.reports,
                self.filter.clone(),
                self.config.malformed,
                workers,
                cancel,
            ),
        );
        let analysis = analysis?;
        let ingest = ingest?;

        let base = match &inputs.changes {
            Some(_) if !inputs.base_sources.is_empty() => Some(
                analyze_sources(
                    self.registry.clone(),
                    inputs.base_sources,
                    self.filter.clone(),
                    workers,
                    self.config.max_file_size(),
                    cancel,
                )
                .await?,
            ),
            _ => None,
        };

        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let impacted = inputs
            .changes
            .as_ref()
            .map(|changes| compute_impact(&analysis, base.as_ref(), changes));

        if let Some(impacted) = &impacted {
            info!("{} labels impacted by the change set", impacted.len());
        }

        let mut payload = Payload::new(
            self.config.metadata.clone(),
            &analysis.files,
            &ingest.coverage,
            impacted.as_ref(),
        );

        let mut unchanged = vec![];
        let mut rejected = None;

        if !self.config.dry_run {
            let force = self.config.upload.force;

            match self.coordinator.register(&payload.digests(), force, cancel).await {
                Ok(registered) => {
                    unchanged =
                        payload.retain_files(|path| registered.should_upload(path.as_str()));
                }
                Err(report) => rejected = Some(report),
            }
        }

        let bytes = payload.to_bytes()?;
        let payload_size = bytes.len();
        let payload_digest = digest(&bytes);

        let upload = if self.config.dry_run {
            info!("dry run, not uploading {} byte payload", payload_size);
            None
        } else if let Some(report) = rejected {
            if report.outcome == UploadOutcome::Cancelled {
                return Err(RunError::Cancelled);
            }

            warn!("file registration failed with {:?}, nothing uploaded", report.outcome);
            Some(report)
        } else {
            let report = self.coordinator.send(bytes, cancel).await;

            match report.outcome {
                UploadOutcome::Cancelled => return Err(RunError::Cancelled),
                UploadOutcome::Acked => info!("uploaded {} byte payload", payload_size),
                outcome => warn!(
                    "upload failed with {:?}, {} of {} chunks acknowledged",
                    outcome,
                    report.acked_chunks(),
                    report.chunks.len()
                ),
            }

            Some(report)
        };

        Ok(RunSummary {
            analyzed: analysis.files.keys().cloned().collect(),
            skipped: analysis.skipped,
            streams: ingest.streams,
            totals: payload.totals,
            unchanged,
            impacted: impacted.map(|set| set.len()),
            payload_size,
            payload_digest,
            upload,
        })
    }
}

fn compute_impact(
    current: &AnalysisResults,
    base: Option<&AnalysisResults>,
    changes: &ChangeSet,
) -> impact::ImpactSet {
    fn index(results: &AnalysisResults) -> FactIndex<'_> {
        FactIndex::new(results.files.values().flat_map(|file| file.facts.iter()))
    }

    let current = index(current);
    let base = base.map(index);

    impact_with_history(&current, base.as_ref(), changes)
}
