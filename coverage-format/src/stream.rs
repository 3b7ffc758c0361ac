// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, BufRead, BufReader, Chain, Cursor, Read};
use std::iter::FusedIterator;

use coverage::CoverageRecord;
use serde::{Deserialize, Serialize};

use crate::cobertura::CoberturaReader;
use crate::format::{sniff, ReportFormat, SNIFF_PREFIX_LEN};
use crate::lcov::LcovReader;
use crate::ReportError;

/// One unit of progress from a format adapter.
#[derive(Debug)]
pub(crate) enum Step {
    Record(CoverageRecord),
    Malformed(String),
}

/// Adapter failures that end the stream.
#[derive(Debug)]
pub(crate) enum ReadError {
    Io(io::Error),

    /// The document can no longer be parsed, e.g. mismatched XML tags.
    Syntax(String),
}

enum Adapter<R> {
    Lcov(LcovReader<R>),
    Cobertura(CoberturaReader<R>),
}

impl<R: BufRead> Adapter<R> {
    fn new(format: ReportFormat, reader: R) -> Self {
        match format {
            ReportFormat::Lcov => Self::Lcov(LcovReader::new(reader)),
            ReportFormat::Cobertura => Self::Cobertura(CoberturaReader::new(reader)),
        }
    }

    fn next_step(&mut self) -> Result<Option<Step>, ReadError> {
        match self {
            Self::Lcov(reader) => reader.next_step().map_err(ReadError::Io),
            Self::Cobertura(reader) => reader.next_step(),
        }
    }
}

fn default_max_consecutive() -> u64 {
    10
}

fn default_max_ratio() -> f64 {
    0.5
}

fn default_min_sample() -> u64 {
    20
}

/// When to give up on a report that keeps failing to parse.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct MalformedPolicy {
    /// Abort after this many malformed records in a row.
    #[serde(default = "default_max_consecutive")]
    pub max_consecutive: u64,

    /// Abort once the malformed share of all records exceeds this...
    #[serde(default = "default_max_ratio")]
    pub max_ratio: f64,

    /// ...but only after this many records have been seen.
    #[serde(default = "default_min_sample")]
    pub min_sample: u64,
}

impl Default for MalformedPolicy {
    fn default() -> Self {
        Self {
            max_consecutive: default_max_consecutive(),
            max_ratio: default_max_ratio(),
            min_sample: default_min_sample(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct StreamStats {
    pub records: u64,
    pub malformed: u64,
}

impl StreamStats {
    pub fn seen(&self) -> u64 {
        self.records + self.malformed
    }
}

/// Tracks malformed records and decides when a stream is beyond saving.
#[derive(Clone, Debug)]
pub struct MalformedGuard {
    policy: MalformedPolicy,
    stats: StreamStats,
    consecutive: u64,
}

impl MalformedGuard {
    pub fn new(policy: MalformedPolicy) -> Self {
        Self {
            policy,
            stats: StreamStats::default(),
            consecutive: 0,
        }
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    pub fn record_ok(&mut self) {
        self.stats.records += 1;
        self.consecutive = 0;
    }

    pub fn record_malformed(&mut self) -> Result<(), ReportError> {
        self.stats.malformed += 1;
        self.consecutive += 1;

        if self.consecutive >= self.policy.max_consecutive {
            return Err(self.abort(format!(
                "{} consecutive malformed records",
                self.consecutive
            )));
        }

        if self.stats.seen() >= self.policy.min_sample && self.ratio() > self.policy.max_ratio {
            return Err(self.abort(format!(
                "malformed ratio {:.2} exceeds {:.2}",
                self.ratio(),
                self.policy.max_ratio
            )));
        }

        Ok(())
    }

    /// Check at end of input. Noise with no usable data at all is the wrong
    /// format, not a sparse report. The ratio limit applies to streams
    /// shorter than the sample size too.
    pub fn finish(&self) -> Result<(), ReportError> {
        if self.stats.malformed == 0 {
            return Ok(());
        }

        if self.stats.records == 0 {
            return Err(self.abort("no valid records".to_owned()));
        }

        // Short streams never reach the sample size, so judge what was seen.
        if self.ratio() > self.policy.max_ratio {
            return Err(self.abort(format!(
                "malformed ratio {:.2} exceeds {:.2}",
                self.ratio(),
                self.policy.max_ratio
            )));
        }

        Ok(())
    }

    pub fn abort(&self, reason: String) -> ReportError {
        ReportError::Malformed {
            reason,
            malformed: self.stats.malformed,
            seen: self.stats.seen(),
        }
    }

    fn ratio(&self) -> f64 {
        match self.stats.seen() {
            0 => 0.0,
            seen => self.stats.malformed as f64 / seen as f64,
        }
    }
}

/// Lazy, single-pass sequence of records from one report.
///
/// Yields at most one error, after which it is exhausted.
pub struct RecordStream<R> {
    adapter: Adapter<R>,
    guard: MalformedGuard,
    format: ReportFormat,
    done: bool,
}

impl<R: BufRead> RecordStream<R> {
    pub fn new(reader: R, format: ReportFormat, policy: MalformedPolicy) -> Self {
        Self {
            adapter: Adapter::new(format, reader),
            guard: MalformedGuard::new(policy),
            format,
            done: false,
        }
    }

    pub fn format(&self) -> ReportFormat {
        self.format
    }

    pub fn stats(&self) -> StreamStats {
        self.guard.stats()
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = Result<CoverageRecord, ReportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let error = match self.adapter.next_step() {
                Ok(Some(Step::Record(record))) => {
                    self.guard.record_ok();
                    return Some(Ok(record));
                }
                Ok(Some(Step::Malformed(reason))) => {
                    debug!("skipping malformed {} record: {}", self.format, reason);

                    match self.guard.record_malformed() {
                        Ok(()) => continue,
                        Err(err) => err,
                    }
                }
                Ok(None) => match self.guard.finish() {
                    Ok(()) => {
                        self.done = true;
                        return None;
                    }
                    Err(err) => err,
                },
                Err(ReadError::Io(err)) => ReportError::Io(err),
                Err(ReadError::Syntax(reason)) => self.guard.abort(reason),
            };

            self.done = true;
            return Some(Err(error));
        }
    }
}

impl<R: BufRead> FusedIterator for RecordStream<R> {}

/// Reader type of a stream whose sniffed prefix was put back in front.
pub type PrefixedReader<R> = BufReader<Chain<Cursor<Vec<u8>>, R>>;

/// Open a report stream, detecting its format if it is not declared.
///
/// At most [`SNIFF_PREFIX_LEN`] bytes are read before deciding, and those
/// bytes are replayed, so the underlying reader is consumed exactly once.
pub fn open<R: Read>(
    mut reader: R,
    declared: Option<ReportFormat>,
    policy: MalformedPolicy,
) -> Result<RecordStream<PrefixedReader<R>>, ReportError> {
    let mut prefix = Vec::with_capacity(SNIFF_PREFIX_LEN);
    (&mut reader)
        .take(SNIFF_PREFIX_LEN as u64)
        .read_to_end(&mut prefix)?;

    let format = match declared {
        Some(format) => format,
        None => sniff(&prefix).ok_or(ReportError::UnknownFormat(prefix.len()))?,
    };

    debug!("opened {} report stream", format);

    let reader = BufReader::new(Cursor::new(prefix).chain(reader));

    Ok(RecordStream::new(reader, format, policy))
}
