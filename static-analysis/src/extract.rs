// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;

use coverage::{Line, SourcePath};

use crate::fact::{FileFacts, LabelId, LabelKind, StructuralFact};
use crate::source::SourceFile;
use crate::syntax::{NodeId, NodeKind, SyntaxTree};

const ANONYMOUS: &str = "<anonymous>";

/// Label scope that children are numbered within.
struct Frame {
    label: Option<LabelId>,
    kind: Option<LabelKind>,
    chain: Vec<String>,
    ordinals: HashMap<String, u32>,
}

impl Frame {
    fn next_ordinal(&mut self, key: String) -> u32 {
        let counter = self.ordinals.entry(key).or_default();
        let ordinal = *counter;
        *counter += 1;
        ordinal
    }
}

/// Derive the structural facts of one file, in depth-first pre-order.
pub fn extract(path: &SourcePath, tree: &SyntaxTree) -> Vec<StructuralFact> {
    let mut facts = vec![];

    if tree.is_empty() {
        return facts;
    }

    let mut frames = vec![Frame {
        label: None,
        kind: None,
        chain: vec![],
        ordinals: HashMap::new(),
    }];

    // (node, index of the frame it belongs to)
    let mut stack: Vec<(NodeId, usize)> = vec![(tree.root(), 0)];

    while let Some((id, frame_index)) = stack.pop() {
        let node = tree.node(id);
        let mut child_frame = frame_index;

        match node.kind {
            NodeKind::NonExecutable => continue,
            NodeKind::Error | NodeKind::Other => {}
            NodeKind::Statement
            | NodeKind::ClassDef
            | NodeKind::FunctionDef
            | NodeKind::MethodDef => {
                let parent = &mut frames[frame_index];

                let kind = match node.kind {
                    NodeKind::ClassDef => LabelKind::Class,
                    NodeKind::MethodDef => LabelKind::Method,
                    NodeKind::FunctionDef if parent.kind == Some(LabelKind::Class) => {
                        LabelKind::Method
                    }
                    NodeKind::FunctionDef => LabelKind::Function,
                    _ => LabelKind::Statement,
                };

                let name = match (&node.name, kind) {
                    (_, LabelKind::Statement) => node.grammar_kind.to_owned(),
                    (Some(name), _) => name.clone(),
                    (None, _) => ANONYMOUS.to_owned(),
                };

                let range = checked_range(node.start_line, node.end_line, tree.line_count());

                let Some((start_line, end_line)) = range else {
                    debug!(
                        "dropping {} `{}` in {} with invalid range {}-{}",
                        kind, name, path, node.start_line, node.end_line
                    );
                    push_children(&mut stack, tree, id, frame_index);
                    continue;
                };

                let (chain, ordinal) = if kind.is_scope() {
                    let ordinal = parent.next_ordinal(format!("{kind}:{name}"));
                    let mut chain = parent.chain.clone();
                    chain.push(name.clone());
                    (chain, ordinal)
                } else {
                    let ordinal = parent.next_ordinal(kind.to_string());
                    (parent.chain.clone(), ordinal)
                };

                let label = LabelId::new(path, kind, &chain, ordinal);

                let fact = StructuralFact {
                    path: path.clone(),
                    label: label.clone(),
                    kind,
                    name,
                    scope: parent.chain.clone(),
                    start_line,
                    end_line,
                    parent: parent.label.clone(),
                };

                facts.push(fact);

                if kind.is_scope() {
                    frames.push(Frame {
                        label: Some(label),
                        kind: Some(kind),
                        chain,
                        ordinals: HashMap::new(),
                    });
                    child_frame = frames.len() - 1;
                }
            }
        }

        push_children(&mut stack, tree, id, child_frame);
    }

    facts
}

fn push_children(stack: &mut Vec<(NodeId, usize)>, tree: &SyntaxTree, id: NodeId, frame: usize) {
    for child in tree.node(id).children.iter().rev() {
        stack.push((*child, frame));
    }
}

/// A fact's range must be non-empty and inside the file.
fn checked_range(start: u32, end: u32, line_count: u32) -> Option<(Line, Line)> {
    if start > end || end > line_count {
        return None;
    }

    Some((Line::new(start).ok()?, Line::new(end).ok()?))
}

impl FileFacts {
    pub fn new(file: &SourceFile, tree: &SyntaxTree) -> Self {
        Self {
            path: file.path().clone(),
            language: tree.language(),
            content_hash: file.hash().to_owned(),
            line_count: tree.line_count(),
            facts: extract(file.path(), tree),
        }
    }
}
