// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::path::Path;

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize};

/// Relative, canonicalized path to a source file. Guaranteed UTF-8.
///
/// Separators are always `/`, and the path never contains `.` or `..`
/// segments, so two spellings of the same file compare equal.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct SourcePath(String);

impl SourcePath {
    pub fn new(path: impl AsRef<str>) -> Result<Self> {
        let path = path.as_ref().replace('\\', "/");

        let mut segments: Vec<&str> = vec![];

        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    if segments.pop().is_none() {
                        bail!("source path escapes the project root: {}", path);
                    }
                }
                s => segments.push(s),
            }
        }

        if segments.is_empty() {
            bail!("source path is empty");
        }

        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    pub fn file_name(&self) -> &str {
        // Non-empty by construction, so there is always a last segment.
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn directory(&self) -> &str {
        match self.0.rfind('/') {
            Some(index) => &self.0[..index],
            None => "",
        }
    }

    pub fn extension(&self) -> Option<&str> {
        self.as_path().extension().and_then(|ext| ext.to_str())
    }
}

impl<'de> Deserialize<'de> for SourcePath {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        SourcePath::new(s).map_err(serde::de::Error::custom)
    }
}

impl From<SourcePath> for String {
    fn from(path: SourcePath) -> Self {
        path.0
    }
}

impl AsRef<str> for SourcePath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl AsRef<Path> for SourcePath {
    fn as_ref(&self) -> &Path {
        self.as_path()
    }
}

impl fmt::Display for SourcePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn test_canonical_forms() -> Result<()> {
        assert_eq!(SourcePath::new("src/lib.py")?.as_str(), "src/lib.py");
        assert_eq!(SourcePath::new("./src/lib.py")?.as_str(), "src/lib.py");
        assert_eq!(SourcePath::new("/src//lib.py")?.as_str(), "src/lib.py");
        assert_eq!(SourcePath::new("src\\pkg\\mod.py")?.as_str(), "src/pkg/mod.py");
        assert_eq!(SourcePath::new("src/pkg/../lib.py")?.as_str(), "src/lib.py");

        Ok(())
    }

    #[test]
    fn test_invalid_paths() {
        assert!(SourcePath::new("").is_err());
        assert!(SourcePath::new("./").is_err());
        assert!(SourcePath::new("../outside.py").is_err());
        assert!(SourcePath::new("src/../../outside.py").is_err());
    }

    #[test]
    fn test_components() -> Result<()> {
        let path = SourcePath::new("src/pkg/mod.py")?;
        assert_eq!(path.file_name(), "mod.py");
        assert_eq!(path.directory(), "src/pkg");
        assert_eq!(path.extension(), Some("py"));

        let top = SourcePath::new("setup.py")?;
        assert_eq!(top.directory(), "");

        Ok(())
    }

    #[test]
    fn test_deserialize_canonicalizes() -> Result<()> {
        let path: SourcePath = serde_json::from_str(r#""./a/b/../c.js""#)?;
        assert_eq!(path.as_str(), "a/c.js");

        let invalid = serde_json::from_str::<SourcePath>(r#""../c.js""#);
        assert!(invalid.is_err());

        Ok(())
    }
}
