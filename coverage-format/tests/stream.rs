// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::io::{self, Read};

use anyhow::Result;
use coverage::{merge, Line, SourcePath};
use coverage_format::{open, MalformedPolicy, ReportError, ReportFormat, SNIFF_PREFIX_LEN};
use pretty_assertions::assert_eq;

const LCOV: &str = include_str!("test-data/sample.info");
const COBERTURA: &str = include_str!("test-data/sample.xml");
const NOISY: &str = include_str!("test-data/noisy.info");

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_sniffed_lcov() -> Result<()> {
    init_logging();

    let mut stream = open(LCOV.as_bytes(), None, MalformedPolicy::default())?;
    assert_eq!(stream.format(), ReportFormat::Lcov);

    let coverage = merge(stream.by_ref().collect::<Result<Vec<_>, _>>()?);
    assert_eq!(stream.stats().records, 10);
    assert_eq!(stream.stats().malformed, 0);

    let main = coverage
        .file(&SourcePath::new("src/app/main.py")?)
        .ok_or_else(|| anyhow::anyhow!("main.py missing"))?;

    // Line 3 was unhit in one test, hit in another.
    assert_eq!(main.is_hit(Line::new(3)?), Some(true));
    assert_eq!(main.lines[&Line::new(3)?].count, Some(2));
    assert_eq!(main.is_hit(Line::new(5)?), Some(true));
    assert_eq!(main.is_hit(Line::new(4)?), None);
    assert_eq!(main.lines[&Line::new(2)?].branches.len(), 2);

    Ok(())
}

#[test]
fn test_sniffed_cobertura() -> Result<()> {
    init_logging();

    let mut stream = open(COBERTURA.as_bytes(), None, MalformedPolicy::default())?;
    assert_eq!(stream.format(), ReportFormat::Cobertura);

    let coverage = merge(stream.by_ref().collect::<Result<Vec<_>, _>>()?);
    assert_eq!(stream.stats().records, 5);

    let util = coverage
        .file(&SourcePath::new("src/app/util.py")?)
        .ok_or_else(|| anyhow::anyhow!("util.py missing"))?;

    // Method lines are not double counted.
    assert_eq!(util.lines[&Line::new(1)?].count, Some(1));
    assert_eq!(util.hit_lines(), 1);

    let main = coverage
        .file(&SourcePath::new("src/app/main.py")?)
        .ok_or_else(|| anyhow::anyhow!("main.py missing"))?;
    let conditions = main.lines[&Line::new(2)?]
        .conditions
        .ok_or_else(|| anyhow::anyhow!("conditions missing"))?;
    assert_eq!((conditions.covered, conditions.total), (1, 2));

    Ok(())
}

#[test]
fn test_declared_format_wins() -> Result<()> {
    // Sniffing would reject this: the first line is not a known tag.
    let text = format!("FN:1,main\n{LCOV}");

    assert!(matches!(
        open(text.as_bytes(), None, MalformedPolicy::default()),
        Err(ReportError::UnknownFormat(_))
    ));

    let stream = open(text.as_bytes(), Some(ReportFormat::Lcov), MalformedPolicy::default())?;
    assert_eq!(stream.count(), 10);

    Ok(())
}

#[test]
fn test_unknown_format_is_an_error() {
    let json = br#"{"coverage": {"src/a.py": [null, 1, 0]}}"#;

    let err = open(&json[..], None, MalformedPolicy::default()).err();
    assert!(matches!(err, Some(ReportError::UnknownFormat(n)) if n == json.len()));
}

#[test]
fn test_mostly_malformed_stream_aborts() -> Result<()> {
    init_logging();

    let mut stream = open(NOISY.as_bytes(), None, MalformedPolicy::default())?;

    let mut records = 0;
    let mut error = None;

    for item in stream.by_ref() {
        match item {
            Ok(_) => records += 1,
            Err(err) => error = Some(err),
        }
    }

    // Aborts when the 20th record pushes the malformed share to 60%.
    assert_eq!(records, 8);
    assert!(matches!(
        error,
        Some(ReportError::Malformed {
            malformed: 12,
            seen: 20,
            ..
        })
    ));

    // Exhausted after the error.
    assert!(stream.next().is_none());

    Ok(())
}

#[test]
fn test_short_mostly_malformed_stream_aborts() -> Result<()> {
    // Fewer lines than the sample size, but most of them are garbage.
    let text = "SF:a.py\nDA:1,1\nbad\nDA:2,1\nbad\nDA:3,1\nbad\nDA:4,1\nbad\nbad\nbad\n";

    let items: Vec<_> = open(text.as_bytes(), None, MalformedPolicy::default())?.collect();

    assert_eq!(items.len(), 5);
    assert_eq!(items.iter().filter(|item| item.is_ok()).count(), 4);
    assert!(matches!(
        items.last(),
        Some(Err(ReportError::Malformed {
            malformed: 6,
            seen: 10,
            ..
        }))
    ));

    Ok(())
}

#[test]
fn test_noise_is_tolerated() -> Result<()> {
    let text = LCOV.replace("FNF:1\n", "FNF:1\nnot a tag\n");

    let mut stream = open(text.as_bytes(), None, MalformedPolicy::default())?;
    let records = stream.by_ref().collect::<Result<Vec<_>, _>>()?;

    assert_eq!(records.len(), 10);
    assert_eq!(stream.stats().malformed, 1);

    Ok(())
}

#[test]
fn test_cobertura_syntax_error_aborts() {
    let text = COBERTURA.replace("</classes>", "</package>");

    let errors: Vec<_> = open(text.as_bytes(), None, MalformedPolicy::default())
        .into_iter()
        .flatten()
        .filter_map(|item| item.err())
        .collect();

    assert_eq!(errors.len(), 1);
    assert!(errors[0].is_malformed());
}

/// Reader that counts how many bytes were pulled from it.
struct Counting<R> {
    inner: R,
    read: usize,
}

impl<R: Read> Read for Counting<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n;
        Ok(n)
    }
}

#[test]
fn test_prefix_is_replayed_once() -> Result<()> {
    // Larger than the sniffing prefix, so the tail comes from the reader.
    let mut text = String::from("SF:src/big.py\n");
    let mut line = 1;
    while text.len() < SNIFF_PREFIX_LEN * 4 {
        text.push_str(&format!("DA:{line},1\n"));
        line += 1;
    }
    text.push_str("end_of_record\n");

    let mut reader = Counting {
        inner: text.as_bytes(),
        read: 0,
    };

    let stream = open(&mut reader, None, MalformedPolicy::default())?;
    let records = stream.collect::<Result<Vec<_>, _>>()?;

    assert_eq!(records.len(), line - 1);
    assert_eq!(reader.read, text.len());

    Ok(())
}
