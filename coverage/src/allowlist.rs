// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{Context, Result};
use regex::{Regex, RegexSet};

/// Include/exclude rules over canonical source paths.
///
/// A path passes when it matches some include rule and no exclude rule.
#[derive(Clone, Debug)]
pub struct PathFilter {
    include: RegexSet,
    exclude: RegexSet,
}

impl PathFilter {
    pub fn new<I, E>(include: I, exclude: E) -> Result<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let include = compile(include)?;
        let exclude = compile(exclude)?;

        Self::from_rules(&include, &exclude)
    }

    /// Parse line-oriented rules: `# comment`, `! <exclude glob>`, or an
    /// include glob. Invalid lines are skipped with a warning. As with
    /// [`PathFilter::new`], a file without include rules includes everything.
    pub fn parse(text: &str) -> Result<Self> {
        let mut include = vec![];
        let mut exclude = vec![];

        for (index, line) in text.lines().enumerate() {
            match RuleLine::parse(line) {
                Ok(RuleLine::Blank) | Ok(RuleLine::Comment) => {}
                Ok(RuleLine::Include(re)) => include.push(re),
                Ok(RuleLine::Exclude(re)) => exclude.push(re),
                Err(err) => {
                    warn!("ignoring path rule at line {}: {:#}", index + 1, err);
                }
            }
        }

        Self::from_rules(&include, &exclude)
    }

    fn from_rules(include: &[Regex], exclude: &[Regex]) -> Result<Self> {
        // No include rules means everything is included.
        let include = if include.is_empty() {
            RegexSet::new([".*"])?
        } else {
            RegexSet::new(include.iter().map(Regex::as_str))?
        };
        let exclude = RegexSet::new(exclude.iter().map(Regex::as_str))?;

        Ok(Self { include, exclude })
    }

    pub fn is_allowed(&self, path: impl AsRef<str>) -> bool {
        let path = path.as_ref();
        self.include.is_match(path) && !self.exclude.is_match(path)
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            include: RegexSet::new([".*"]).unwrap_or_else(|_| RegexSet::empty()),
            exclude: RegexSet::empty(),
        }
    }
}

enum RuleLine {
    Blank,
    Comment,
    Include(Regex),
    Exclude(Regex),
}

impl RuleLine {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();

        if line.is_empty() {
            return Ok(Self::Blank);
        }

        if line.starts_with('#') {
            return Ok(Self::Comment);
        }

        if let Some(expr) = line.strip_prefix('!') {
            return Ok(Self::Exclude(glob_to_regex(expr.trim())?));
        }

        Ok(Self::Include(glob_to_regex(line)?))
    }
}

fn compile<I>(globs: I) -> Result<Vec<Regex>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    globs
        .into_iter()
        .map(|glob| glob_to_regex(glob.as_ref()))
        .collect()
}

/// Translate a path glob into an anchored regex.
///
/// `**` crosses directories, `*` and `?` do not. A trailing `/` (or a
/// trailing `/**`) selects everything below that folder.
fn glob_to_regex(glob: &str) -> Result<Regex> {
    let glob = glob.trim_start_matches("./");

    let (glob, subtree) = match glob.strip_suffix("/**").or_else(|| glob.strip_suffix('/')) {
        Some(dir) => (dir, true),
        None => (glob, false),
    };

    let mut expr = String::from("^");
    let mut chars = glob.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();

                // `**/` matches zero or more whole directories.
                if chars.peek() == Some(&'/') {
                    chars.next();
                    expr.push_str("(?:.*/)?");
                } else {
                    expr.push_str(".*");
                }
            }
            '*' => expr.push_str("[^/]*"),
            '?' => expr.push_str("[^/]"),
            c => expr.push_str(&regex::escape(&c.to_string())),
        }
    }

    if subtree {
        expr.push_str("(?:/.*)?");
    }
    expr.push('$');

    Regex::new(&expr).with_context(|| format!("invalid path glob: {glob}"))
}
