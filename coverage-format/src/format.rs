// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ReportError;

/// Upper bound on the bytes inspected when sniffing a report's format.
pub const SNIFF_PREFIX_LEN: usize = 8 * 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const LCOV_TAGS: &[&str] = &["TN", "SF", "VER"];

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    /// Line-oriented `lcov` tracefile.
    Lcov,

    /// Cobertura XML.
    Cobertura,
}

impl ReportFormat {
    /// Resolve a caller-declared format name, e.g. `lcov` or `cobertura`.
    pub fn from_name(name: &str) -> Result<Self, ReportError> {
        name.parse()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lcov => "lcov",
            Self::Cobertura => "cobertura",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lcov" | "info" => Ok(Self::Lcov),
            "cobertura" | "xml" => Ok(Self::Cobertura),
            _ => Err(ReportError::UnknownFormatName(s.to_owned())),
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Guess a report's format from a bounded prefix of its bytes.
pub fn sniff(prefix: &[u8]) -> Option<ReportFormat> {
    let prefix = &prefix[..prefix.len().min(SNIFF_PREFIX_LEN)];
    let prefix = prefix.strip_prefix(UTF8_BOM).unwrap_or(prefix);

    // The prefix may end mid-character.
    let text = String::from_utf8_lossy(prefix);
    let text = text.trim_start();

    if text.starts_with('<') {
        // Any XML document must declare a Cobertura root to qualify.
        if text.contains("<coverage") {
            return Some(ReportFormat::Cobertura);
        }

        return None;
    }

    let first = text.lines().map(str::trim).find(|line| !line.is_empty())?;

    let tag = first.split_once(':').map(|(tag, _)| tag)?;

    if LCOV_TAGS.contains(&tag) {
        return Some(ReportFormat::Lcov);
    }

    None
}
