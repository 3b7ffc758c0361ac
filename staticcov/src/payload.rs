// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use coverage::{SourceCoverage, SourcePath};
use impact::{map_labels, summarize, CoverageTotals, ImpactSet, ImpactedLabel, LabelCoverage};
use serde::Serialize;
use static_analysis::{FileFacts, Language, StructuralFact};
use uploader::FileDigest;

use crate::config::UploadMetadata;

/// Everything the collector receives for one run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Payload {
    pub metadata: UploadMetadata,
    pub totals: CoverageTotals,

    /// Sorted by path.
    pub files: Vec<FilePayload>,

    /// Absent when no change set was supplied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impacted: Option<Vec<ImpactedLabel>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilePayload {
    pub path: SourcePath,
    pub language: Language,
    pub content_hash: String,
    pub line_count: u32,
    pub facts: Vec<StructuralFact>,
    pub labels: Vec<LabelCoverage>,
}

impl Payload {
    pub fn new(
        metadata: UploadMetadata,
        files: &BTreeMap<SourcePath, FileFacts>,
        coverage: &SourceCoverage,
        impacted: Option<&ImpactSet>,
    ) -> Self {
        let files: Vec<FilePayload> = files
            .values()
            .map(|file| FilePayload {
                path: file.path.clone(),
                language: file.language,
                content_hash: file.content_hash.clone(),
                line_count: file.line_count,
                labels: map_labels(&file.facts, coverage.file(&file.path)),
                facts: file.facts.clone(),
            })
            .collect();

        let labels: Vec<LabelCoverage> = files
            .iter()
            .flat_map(|file| file.labels.iter().cloned())
            .collect();

        Self {
            metadata,
            totals: summarize(&labels),
            files,
            impacted: impacted.map(|set| set.iter().cloned().collect()),
        }
    }

    /// Content hash of every file entry.
    pub fn digests(&self) -> Vec<FileDigest> {
        self.files
            .iter()
            .map(|file| FileDigest::new(file.path.as_str(), file.content_hash.as_str()))
            .collect()
    }

    /// Keep the file entries `keep` accepts and return the paths of the rest.
    /// Totals and impact still cover every file.
    pub fn retain_files(&mut self, keep: impl Fn(&SourcePath) -> bool) -> Vec<SourcePath> {
        let (kept, dropped): (Vec<_>, Vec<_>) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|file| keep(&file.path));

        self.files = kept;
        dropped.into_iter().map(|file| file.path).collect()
    }

    /// Serialized form. Identical inputs always give identical bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use coverage::{CoverageRecord, Hits, Line};
    use pretty_assertions::assert_eq;
    use static_analysis::{GrammarRegistry, SourceFile};

    use super::*;

    const SOURCE: &str = "def f():\n    return 1\n\nx = f()\n";

    fn facts() -> Result<BTreeMap<SourcePath, FileFacts>> {
        let registry = GrammarRegistry::new()?;
        let file = SourceFile::new(SourcePath::new("app/f.py")?, SOURCE.as_bytes(), None);
        let tree = registry.parse_language(Language::Python, file.path(), file.content())?;

        let mut files = BTreeMap::new();
        files.insert(file.path().clone(), FileFacts::new(&file, &tree));
        Ok(files)
    }

    #[test]
    fn test_payload_maps_labels() -> Result<()> {
        let files = facts()?;
        let path = SourcePath::new("app/f.py")?;

        let mut coverage = SourceCoverage::default();
        coverage.record(&CoverageRecord::line(path.clone(), Line::new(2)?, Hits::Count(1)));
        coverage.record(&CoverageRecord::line(path, Line::new(4)?, Hits::Count(0)));

        let payload = Payload::new(UploadMetadata::default(), &files, &coverage, None);

        assert_eq!(payload.files.len(), 1);
        assert_eq!(payload.files[0].labels.len(), payload.files[0].facts.len());
        assert!(payload.totals.executable_lines > 0);
        assert!(payload.impacted.is_none());

        Ok(())
    }

    #[test]
    fn test_payload_bytes_are_deterministic() -> Result<()> {
        let files = facts()?;
        let metadata = UploadMetadata {
            commit: Some("abc123".into()),
            ..UploadMetadata::default()
        };

        let lhs = Payload::new(metadata.clone(), &files, &SourceCoverage::default(), None);
        let rhs = Payload::new(metadata, &files, &SourceCoverage::default(), None);

        assert_eq!(lhs.to_bytes()?, rhs.to_bytes()?);

        let json: serde_json::Value = serde_json::from_slice(&lhs.to_bytes()?)?;
        assert_eq!(json["metadata"]["commit"], "abc123");
        assert_eq!(json["files"][0]["path"], "app/f.py");
        assert!(json.get("impacted").is_none());

        Ok(())
    }

    #[test]
    fn test_retained_files_keep_totals() -> Result<()> {
        let files = facts()?;
        let mut payload = Payload::new(
            UploadMetadata::default(),
            &files,
            &SourceCoverage::default(),
            None,
        );
        let totals = payload.totals;

        let digests = payload.digests();
        assert_eq!(digests.len(), 1);
        assert_eq!(digests[0].path, "app/f.py");
        assert_eq!(digests[0].content_hash, payload.files[0].content_hash);

        let dropped = payload.retain_files(|path| path.as_str() != "app/f.py");

        assert_eq!(dropped, vec![SourcePath::new("app/f.py")?]);
        assert!(payload.files.is_empty());
        assert_eq!(payload.totals, totals);

        Ok(())
    }
}
