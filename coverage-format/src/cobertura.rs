// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Event-driven reader for Cobertura XML.
//!
//! Expected shape:
//!
//! ```text
//! coverage > packages > package > classes > class[filename]
//!     > methods > method > lines > line     (ignored, repeats class lines)
//!     > lines > line[number, hits, branch?, condition-coverage?]
//! ```

use std::io::{self, BufRead};

use coverage::{Conditions, CoverageRecord, Hits, Line, SourcePath};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::stream::{ReadError, Step};

pub struct CoberturaReader<R> {
    reader: Reader<R>,
    buf: Vec<u8>,

    // `None` outside a `<class>`. An unusable `filename` is kept as the
    // reason, so each of its lines reports as malformed.
    filename: Option<Result<SourcePath, String>>,
    method_depth: usize,
}

impl<R: BufRead> CoberturaReader<R> {
    pub fn new(reader: R) -> Self {
        let mut reader = Reader::from_reader(reader);
        reader.trim_text(true);

        Self {
            reader,
            buf: Vec::new(),
            filename: None,
            method_depth: 0,
        }
    }

    pub(crate) fn next_step(&mut self) -> Result<Option<Step>, ReadError> {
        loop {
            self.buf.clear();

            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(quick_xml::Error::Io(err)) => {
                    return Err(ReadError::Io(io::Error::new(err.kind(), err.to_string())));
                }
                Err(err) => {
                    let position = self.reader.buffer_position();
                    return Err(ReadError::Syntax(format!("{err} at byte {position}")));
                }
            };

            match event {
                Event::Start(e) => match e.name().as_ref() {
                    b"class" => self.filename = Some(class_filename(&e)),
                    b"method" => self.method_depth += 1,
                    b"line" => {
                        if let Some(step) = line_step(&self.filename, self.method_depth, &e) {
                            return Ok(Some(step));
                        }
                    }
                    _ => {}
                },
                Event::Empty(e) => {
                    if e.name().as_ref() == b"line" {
                        if let Some(step) = line_step(&self.filename, self.method_depth, &e) {
                            return Ok(Some(step));
                        }
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"class" => self.filename = None,
                    b"method" => self.method_depth = self.method_depth.saturating_sub(1),
                    _ => {}
                },
                Event::Eof => return Ok(None),
                _ => {}
            }
        }
    }
}

fn class_filename(e: &BytesStart) -> Result<SourcePath, String> {
    let filename = attribute(e, b"filename")?.ok_or("class without a filename")?;
    SourcePath::new(&filename).map_err(|err| format!("class filename `{filename}`: {err}"))
}

fn line_step(
    filename: &Option<Result<SourcePath, String>>,
    method_depth: usize,
    e: &BytesStart,
) -> Option<Step> {
    if method_depth > 0 {
        return None;
    }

    let result = match filename {
        None => Err("line outside of a class".to_owned()),
        Some(Err(reason)) => Err(reason.clone()),
        Some(Ok(path)) => line_record(path, e),
    };

    Some(match result {
        Ok(record) => Step::Record(record),
        Err(reason) => Step::Malformed(reason),
    })
}

fn line_record(path: &SourcePath, e: &BytesStart) -> Result<CoverageRecord, String> {
    let number = attribute(e, b"number")?.ok_or("line without a number")?;
    let number: u32 = number
        .parse()
        .map_err(|_| format!("invalid line number `{number}`"))?;
    let line = Line::new(number).map_err(|err| err.to_string())?;

    let hits = attribute(e, b"hits")?.ok_or("line without hits")?;
    let hits = parse_hits(&hits)?;

    let mut record = CoverageRecord::line(path.clone(), line, Hits::Count(hits));

    if attribute(e, b"branch")?.as_deref() == Some("true") {
        if let Some(coverage) = attribute(e, b"condition-coverage")? {
            record.conditions = Some(parse_condition_coverage(&coverage)?);
        }
    }

    Ok(record)
}

fn attribute(e: &BytesStart, name: &[u8]) -> Result<Option<String>, String> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| err.to_string())?;

        if attr.key.as_ref() == name {
            let value = attr.unescape_value().map_err(|err| err.to_string())?;
            return Ok(Some(value.into_owned()));
        }
    }

    Ok(None)
}

fn parse_hits(hits: &str) -> Result<u64, String> {
    if let Ok(hits) = hits.parse::<u64>() {
        return Ok(hits);
    }

    // Some emitters write large counts in float notation.
    match hits.parse::<f64>() {
        Ok(hits) if hits.is_finite() && hits >= 0.0 => Ok(hits as u64),
        _ => Err(format!("invalid hits `{hits}`")),
    }
}

/// Parse `condition-coverage`, e.g. `50% (1/2)`.
fn parse_condition_coverage(text: &str) -> Result<Conditions, String> {
    let invalid = || format!("invalid condition-coverage `{text}`");

    let open = text.find('(').ok_or_else(invalid)?;
    let close = text.rfind(')').ok_or_else(invalid)?;
    let fraction = text.get(open + 1..close).ok_or_else(invalid)?;

    let (covered, total) = fraction.split_once('/').ok_or_else(invalid)?;
    let covered: u32 = covered.trim().parse().map_err(|_| invalid())?;
    let total: u32 = total.trim().parse().map_err(|_| invalid())?;

    if covered > total {
        return Err(invalid());
    }

    Ok(Conditions { covered, total })
}
