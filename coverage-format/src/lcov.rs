// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reader for `lcov` tracefiles.
//!
//! Only line (`DA`) and branch (`BRDA`) data become records. Function and
//! summary tags are recognized and skipped.

use std::io::{self, BufRead, Read};

use coverage::{BranchId, CoverageRecord, Hits, Line, SourcePath};

use crate::stream::Step;

/// Longest line the reader buffers. Anything longer is malformed.
pub const MAX_LINE_LEN: usize = 64 * 1024;

const IGNORED_TAGS: &[&str] = &[
    "TN", "VER", "FN", "FNL", "FNA", "FNDA", "FNF", "FNH", "BRF", "BRH", "LF", "LH",
];

pub struct LcovReader<R> {
    reader: R,
    buf: Vec<u8>,
    file: Option<SourcePath>,
    line_number: u64,
}

impl<R: BufRead> LcovReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            file: None,
            line_number: 0,
        }
    }

    pub(crate) fn next_step(&mut self) -> io::Result<Option<Step>> {
        loop {
            self.buf.clear();

            let read = (&mut self.reader)
                .take(MAX_LINE_LEN as u64 + 1)
                .read_until(b'\n', &mut self.buf)?;

            if read == 0 {
                return Ok(None);
            }

            self.line_number += 1;

            if self.buf.len() > MAX_LINE_LEN && !self.buf.ends_with(b"\n") {
                self.skip_rest_of_line()?;
                return Ok(Some(Step::Malformed(format!(
                    "line {} is longer than {} bytes",
                    self.line_number, MAX_LINE_LEN
                ))));
            }

            let text = match std::str::from_utf8(&self.buf) {
                Ok(text) => text.trim_start_matches('\u{feff}').trim(),
                Err(_) => {
                    return Ok(Some(Step::Malformed(format!(
                        "line {} is not valid UTF-8",
                        self.line_number
                    ))));
                }
            };

            if text.is_empty() {
                continue;
            }

            match parse_line(&mut self.file, text) {
                Ok(Some(record)) => return Ok(Some(Step::Record(record))),
                Ok(None) => continue,
                Err(reason) => {
                    return Ok(Some(Step::Malformed(format!(
                        "line {}: {}",
                        self.line_number, reason
                    ))));
                }
            }
        }
    }

    fn skip_rest_of_line(&mut self) -> io::Result<()> {
        loop {
            let (used, done) = {
                let available = self.reader.fill_buf()?;

                match available.iter().position(|b| *b == b'\n') {
                    Some(pos) => (pos + 1, true),
                    None => (available.len(), available.is_empty()),
                }
            };

            self.reader.consume(used);

            if done {
                return Ok(());
            }
        }
    }
}

/// Parse one trimmed, non-empty tracefile line.
///
/// `file` is the path opened by the most recent `SF` tag.
fn parse_line(file: &mut Option<SourcePath>, text: &str) -> Result<Option<CoverageRecord>, String> {
    if text == "end_of_record" {
        *file = None;
        return Ok(None);
    }

    let (tag, value) = text
        .split_once(':')
        .ok_or_else(|| format!("expected `TAG:value`, found `{}`", truncate(text)))?;

    match tag {
        "SF" => {
            // An invalid path leaves no file open, so its data is malformed too.
            *file = None;
            let path = SourcePath::new(value.trim()).map_err(|err| format!("SF: {err}"))?;
            *file = Some(path);
            Ok(None)
        }
        "DA" => {
            let path = current_file(file, tag)?;
            let mut fields = value.split(',');

            let line = parse_line_number(fields.next())?;
            let count = parse_count(fields.next())?;

            Ok(Some(CoverageRecord::line(path, line, Hits::Count(count))))
        }
        "BRDA" => {
            let path = current_file(file, tag)?;
            let fields: Vec<&str> = value.split(',').map(str::trim).collect();

            let [line, block, branch, taken] = fields.as_slice() else {
                return Err(format!("BRDA: expected 4 fields, found {}", fields.len()));
            };

            let line = parse_line_number(Some(*line))?;

            let taken = match *taken {
                "-" => false,
                taken => parse_count(Some(taken))? > 0,
            };

            let branch = BranchId(format!("{block}.{branch}"));

            Ok(Some(CoverageRecord::branch(path, line, branch, taken)))
        }
        tag if IGNORED_TAGS.contains(&tag) => Ok(None),
        tag => Err(format!("unknown tag `{}`", truncate(tag))),
    }
}

fn current_file(file: &Option<SourcePath>, tag: &str) -> Result<SourcePath, String> {
    file.clone()
        .ok_or_else(|| format!("{tag} outside of a source file record"))
}

fn parse_line_number(field: Option<&str>) -> Result<Line, String> {
    let field = field.ok_or("missing line number")?.trim();
    let number: u32 = field
        .parse()
        .map_err(|_| format!("invalid line number `{}`", truncate(field)))?;

    Line::new(number).map_err(|err| err.to_string())
}

fn parse_count(field: Option<&str>) -> Result<u64, String> {
    let field = field.ok_or("missing execution count")?.trim();

    if let Ok(count) = field.parse::<u64>() {
        return Ok(count);
    }

    // Some gcov versions overflow into negative counts.
    match field.parse::<i64>() {
        Ok(count) if count < 0 => Ok(0),
        _ => Err(format!("invalid execution count `{}`", truncate(field))),
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(32) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}
