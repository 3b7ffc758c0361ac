// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use anyhow::{Context, Result};
use coverage::allowlist::PathFilter;
use coverage_format::MalformedPolicy;
use reqwest_retry::{RetryPolicy, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_RETRY_PERIOD, MAX_RETRY_ATTEMPTS};
use serde::{Deserialize, Serialize};
use uploader::chunk::DEFAULT_CHUNK_SIZE;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct RunConfig {
    /// Concurrent analysis and ingestion workers. Defaults to the number of
    /// logical CPUs.
    pub workers: Option<usize>,

    /// Sources larger than this many bytes are skipped.
    pub max_file_size: Option<u64>,

    #[serde(default)]
    pub malformed: MalformedPolicy,

    #[serde(default)]
    pub upload: UploadConfig,

    /// Globs selecting source and report paths. Empty means everything.
    #[serde(default)]
    pub include: Vec<String>,

    #[serde(default)]
    pub exclude: Vec<String>,

    /// Carry on without coverage when no report streams are supplied.
    #[serde(default)]
    pub handle_no_reports_found: bool,

    /// Build the payload but do not send it.
    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub metadata: UploadMetadata,
}

impl RunConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("unable to parse run config")
    }

    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size.unwrap_or(DEFAULT_MAX_FILE_SIZE)
    }

    pub fn path_filter(&self) -> Result<PathFilter> {
        PathFilter::new(&self.include, &self.exclude).context("invalid include/exclude rules")
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct UploadConfig {
    pub chunk_size: Option<usize>,
    pub max_attempts: Option<usize>,
    pub retry_period_ms: Option<u64>,
    pub attempt_timeout_secs: Option<u64>,

    /// Upload every file, even those the collector already holds.
    #[serde(default)]
    pub force: bool,
}

impl UploadConfig {
    pub fn chunk_size(&self) -> usize {
        self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE).max(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_period: self
                .retry_period_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_PERIOD),
            max_attempts: self.max_attempts.unwrap_or(MAX_RETRY_ATTEMPTS).max(1),
            attempt_timeout: self
                .attempt_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_ATTEMPT_TIMEOUT),
        }
    }
}

/// Describes the upload to the collector. Passed through untouched.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct UploadMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_code: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() -> Result<()> {
        let config = RunConfig::from_json("{}")?;

        assert!(config.workers() >= 1);
        assert_eq!(config.max_file_size(), DEFAULT_MAX_FILE_SIZE);
        assert_eq!(config.malformed, MalformedPolicy::default());
        assert_eq!(config.upload.chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(config.upload.retry_policy(), RetryPolicy::default());
        assert!(!config.handle_no_reports_found);
        assert!(!config.dry_run);
        assert!(!config.upload.force);

        Ok(())
    }

    #[test]
    fn test_overrides() -> Result<()> {
        let config = RunConfig::from_json(
            r#"{
                "workers": 0,
                "max_file_size": 10,
                "malformed": { "max_consecutive": 3 },
                "upload": {
                    "chunk_size": 1024,
                    "max_attempts": 2,
                    "retry_period_ms": 5,
                    "force": true
                },
                "exclude": ["vendor/"],
                "metadata": { "commit": "abc123", "flags": ["unit"] }
            }"#,
        )?;

        assert_eq!(config.workers(), 1);
        assert_eq!(config.max_file_size(), 10);
        assert_eq!(config.malformed.max_consecutive, 3);
        assert_eq!(config.malformed.min_sample, 20);
        assert_eq!(config.upload.chunk_size(), 1024);
        assert!(config.upload.force);

        let policy = config.upload.retry_policy();
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.retry_period, Duration::from_millis(5));
        assert_eq!(policy.attempt_timeout, DEFAULT_ATTEMPT_TIMEOUT);

        let filter = config.path_filter()?;
        assert!(filter.is_allowed("src/a.py"));
        assert!(!filter.is_allowed("vendor/b.py"));

        assert_eq!(config.metadata.commit.as_deref(), Some("abc123"));
        assert_eq!(config.metadata.flags, vec!["unit".to_owned()]);

        Ok(())
    }

    #[test]
    fn test_unknown_json_is_an_error() {
        assert!(RunConfig::from_json("[]").is_err());
    }
}
