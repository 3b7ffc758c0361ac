// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;

use coverage::SourcePath;
use thiserror::Error;
use tree_sitter::Parser;

use crate::language::Language;
use crate::source::{line_count, SourceFile};
use crate::syntax::SyntaxTree;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("grammar for {language} is incompatible with the parser runtime: {reason}")]
    Incompatible { language: Language, reason: String },
}

/// A single file could not be analyzed. The rest of the run is unaffected.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unable to parse {path}: {diagnostic}")]
pub struct ParseFailure {
    pub path: SourcePath,
    pub diagnostic: String,
}

#[derive(Debug)]
pub enum ParseOutcome {
    Parsed(SyntaxTree),

    /// No grammar for this file. Not an error.
    Unsupported,

    Failed(ParseFailure),
}

/// Compiled grammars for every supported language, checked once up front.
///
/// Read-only after construction, so one instance can be shared across
/// worker threads.
#[derive(Debug)]
pub struct GrammarRegistry {
    grammars: BTreeMap<Language, tree_sitter::Language>,
}

impl GrammarRegistry {
    pub fn new() -> Result<Self, RegistryError> {
        let mut grammars = BTreeMap::new();

        for language in Language::ALL {
            let grammar = language.grammar();

            // Installing into a parser performs the ABI version check.
            let mut parser = Parser::new();
            parser
                .set_language(&grammar)
                .map_err(|err| RegistryError::Incompatible {
                    language,
                    reason: err.to_string(),
                })?;

            debug!("loaded {} grammar, ABI version {}", language, grammar.version());
            grammars.insert(language, grammar);
        }

        Ok(Self { grammars })
    }

    pub fn languages(&self) -> impl Iterator<Item = Language> + '_ {
        self.grammars.keys().copied()
    }

    pub fn parse(&self, file: &SourceFile) -> ParseOutcome {
        let Some(language) = file.language() else {
            return ParseOutcome::Unsupported;
        };

        if !self.grammars.contains_key(&language) {
            return ParseOutcome::Unsupported;
        }

        match self.parse_language(language, file.path(), file.content()) {
            Ok(tree) => ParseOutcome::Parsed(tree),
            Err(failure) => ParseOutcome::Failed(failure),
        }
    }

    /// Parse `source` with the grammar of `language`.
    ///
    /// Partially valid input still parses; error-recovery nodes are marked in
    /// the resulting tree. Only input the grammar cannot make anything of at
    /// all is a failure.
    pub fn parse_language(
        &self,
        language: Language,
        path: &SourcePath,
        source: &[u8],
    ) -> Result<SyntaxTree, ParseFailure> {
        let failure = |diagnostic: String| ParseFailure {
            path: path.clone(),
            diagnostic,
        };

        let grammar = self
            .grammars
            .get(&language)
            .ok_or_else(|| failure(format!("no grammar registered for {language}")))?;

        if let Err(err) = std::str::from_utf8(source) {
            return Err(failure(format!("source is not valid UTF-8: {err}")));
        }

        // Parsers are cheap and not `Sync`, so each call gets its own.
        let mut parser = Parser::new();
        parser
            .set_language(grammar)
            .map_err(|err| failure(err.to_string()))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| failure("parser produced no tree".to_owned()))?;

        let root = tree.root_node();

        if root.is_error() {
            return Err(failure(format!(
                "no parseable structure (error at {}:{})",
                root.start_position().row + 1,
                root.start_position().column + 1
            )));
        }

        let tree = SyntaxTree::build(
            language,
            language.policy(),
            &tree,
            source,
            line_count(source),
        );

        if tree.has_errors() {
            debug!("{} parsed with error recovery", path);
        }

        Ok(tree)
    }
}
