// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use coverage::SourcePath;
use serde::{Deserialize, Serialize};

use crate::policy::{Policy, JAVASCRIPT, PYTHON};

/// Languages with a bundled grammar.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python, Language::JavaScript];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::JavaScript => "javascript",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Self::Python => &["py"],
            Self::JavaScript => &["js", "mjs", "cjs", "jsx"],
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "python" | "py" => Some(Self::Python),
            "javascript" | "js" => Some(Self::JavaScript),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|lang| lang.extensions().contains(&ext.as_str()))
    }

    /// Resolve the language of a file. A recognized hint wins over the
    /// extension.
    pub fn detect(path: &SourcePath, hint: Option<&str>) -> Option<Self> {
        if let Some(lang) = hint.and_then(Self::from_name) {
            return Some(lang);
        }

        path.extension().and_then(Self::from_extension)
    }

    pub(crate) fn grammar(&self) -> tree_sitter::Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        }
    }

    pub(crate) fn policy(&self) -> &'static Policy {
        match self {
            Self::Python => &PYTHON,
            Self::JavaScript => &JAVASCRIPT,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
