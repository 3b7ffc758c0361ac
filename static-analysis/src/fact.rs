// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::fmt;

use coverage::{Line, SourcePath};
use serde::{Deserialize, Serialize};

use crate::language::Language;

/// Stable identifier of a label: `{path}::{kind}::{scope chain}#{ordinal}`.
///
/// Unchanged as long as the file's structure around the label is unchanged,
/// which makes it comparable across commits.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct LabelId(String);

impl LabelId {
    /// Scope names are joined with `.`. A name that could be mistaken for
    /// more than one segment (`module.exports.f`) is wrapped in backquotes.
    pub fn new(path: &SourcePath, kind: LabelKind, chain: &[String], ordinal: u32) -> Self {
        let chain = if chain.is_empty() {
            MODULE_SCOPE.to_owned()
        } else {
            chain
                .iter()
                .map(|segment| quote_segment(segment))
                .collect::<Vec<_>>()
                .join(".")
        };

        Self(format!("{path}::{kind}::{chain}#{ordinal}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

const MODULE_SCOPE: &str = "<module>";

fn quote_segment(segment: &str) -> Cow<'_, str> {
    let plain = !segment.is_empty()
        && segment != MODULE_SCOPE
        && !segment.contains(&['.', '`', '#', ':'][..]);

    if plain {
        Cow::Borrowed(segment)
    } else {
        Cow::Owned(format!("`{}`", segment.replace('`', "``")))
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelKind {
    Class,
    Function,
    Method,

    /// A statement, or a compound statement with its block.
    Statement,
}

impl LabelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
            Self::Method => "method",
            Self::Statement => "statement",
        }
    }

    pub fn is_scope(&self) -> bool {
        !matches!(self, Self::Statement)
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StructuralFact {
    pub path: SourcePath,
    pub label: LabelId,
    pub kind: LabelKind,

    /// Declared name for scopes; the grammar node kind for statements.
    pub name: String,

    /// Names of the enclosing scopes, outermost first.
    pub scope: Vec<String>,

    pub start_line: Line,
    pub end_line: Line,

    /// Nearest enclosing scope label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<LabelId>,
}

impl StructuralFact {
    pub fn contains(&self, line: Line) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    /// Inclusive line numbers covered by the fact.
    pub fn lines(&self) -> impl Iterator<Item = u32> {
        self.start_line.number()..=self.end_line.number()
    }

    pub fn overlaps(&self, start: Line, end: Line) -> bool {
        self.start_line <= end && start <= self.end_line
    }
}

/// Everything extracted from one file.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FileFacts {
    pub path: SourcePath,
    pub language: Language,
    pub content_hash: String,
    pub line_count: u32,
    pub facts: Vec<StructuralFact>,
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn test_label_id() -> Result<()> {
        let path = SourcePath::new("pkg/shapes.py")?;

        let id = LabelId::new(&path, LabelKind::Method, &["Circle".into(), "area".into()], 0);
        assert_eq!(id.as_str(), "pkg/shapes.py::method::Circle.area#0");

        let id = LabelId::new(&path, LabelKind::Statement, &[], 3);
        assert_eq!(id.as_str(), "pkg/shapes.py::statement::<module>#3");

        Ok(())
    }

    #[test]
    fn test_label_id_quotes_dotted_names() -> Result<()> {
        let path = SourcePath::new("f.js")?;

        let dotted = LabelId::new(&path, LabelKind::Function, &["a.b".into(), "c".into()], 0);
        let nested = LabelId::new(&path, LabelKind::Function, &["a".into(), "b.c".into()], 0);

        assert_eq!(dotted.as_str(), "f.js::function::`a.b`.c#0");
        assert_eq!(nested.as_str(), "f.js::function::a.`b.c`#0");
        assert_ne!(dotted, nested);

        let module = LabelId::new(&path, LabelKind::Function, &["<module>".into()], 0);
        assert_eq!(module.as_str(), "f.js::function::`<module>`#0");

        let tick = LabelId::new(&path, LabelKind::Function, &["a`b".into()], 0);
        assert_eq!(tick.as_str(), "f.js::function::`a``b`#0");

        Ok(())
    }
}
