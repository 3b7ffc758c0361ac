// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#[macro_use]
extern crate log;

pub mod extract;
pub mod fact;
pub mod language;
pub mod policy;
pub mod registry;
pub mod source;
pub mod syntax;

pub use extract::extract;
pub use fact::{FileFacts, LabelId, LabelKind, StructuralFact};
pub use language::Language;
pub use registry::{GrammarRegistry, ParseFailure, ParseOutcome, RegistryError};
pub use source::SourceFile;
pub use syntax::{NodeId, NodeKind, SyntaxNode, SyntaxTree};
