// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use tree_sitter::{Node, Point};

use crate::language::Language;
use crate::policy::Policy;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NodeKind {
    Statement,
    FunctionDef,
    MethodDef,
    ClassDef,
    Other,

    /// Error-recovery node. Never a fact, but its children may be.
    Error,

    /// Comment, string, or type-only region. Kept as a leaf.
    NonExecutable,
}

impl NodeKind {
    pub fn is_scope(&self) -> bool {
        matches!(self, Self::FunctionDef | Self::MethodDef | Self::ClassDef)
    }
}

#[derive(Clone, Debug)]
pub struct SyntaxNode {
    pub kind: NodeKind,

    /// Node kind as named by the grammar, e.g. `if_statement`.
    pub grammar_kind: &'static str,

    /// Declared name of a scope node.
    pub name: Option<String>,

    /// 1-indexed, inclusive.
    pub start_line: u32,
    pub end_line: u32,

    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Arena-allocated syntax tree of one file, nodes in pre-order.
#[derive(Clone, Debug)]
pub struct SyntaxTree {
    language: Language,
    nodes: Vec<SyntaxNode>,
    line_count: u32,
    has_errors: bool,
}

impl SyntaxTree {
    /// Convert a grammar tree, keeping named nodes only.
    pub(crate) fn build(
        language: Language,
        policy: &Policy,
        tree: &tree_sitter::Tree,
        source: &[u8],
        line_count: u32,
    ) -> Self {
        let mut nodes: Vec<SyntaxNode> = vec![];
        let mut has_errors = false;

        let mut stack: Vec<(Node, Option<NodeId>)> = vec![(tree.root_node(), None)];

        while let Some((node, parent)) = stack.pop() {
            if node.is_missing() {
                // Zero-width placeholder inserted by error recovery.
                has_errors = true;
                continue;
            }

            let kind = if node.is_error() {
                has_errors = true;
                NodeKind::Error
            } else {
                policy.classify(node.kind())
            };

            let name = if kind.is_scope() {
                scope_name(policy, node, source)
            } else {
                None
            };

            let (start_line, end_line) = line_span(node.start_position(), node.end_position());

            let id = NodeId(nodes.len());
            nodes.push(SyntaxNode {
                kind,
                grammar_kind: node.kind(),
                name,
                start_line,
                end_line,
                parent,
                children: vec![],
            });

            if let Some(parent) = parent {
                nodes[parent.0].children.push(id);
            }

            if kind == NodeKind::NonExecutable {
                continue;
            }

            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();

            // Reversed, so children pop off in source order.
            for child in children.into_iter().rev() {
                stack.push((child, Some(id)));
            }
        }

        Self {
            language,
            nodes,
            line_count,
            has_errors,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.0]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &SyntaxNode)> {
        self.nodes.iter().enumerate().map(|(i, node)| (NodeId(i), node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn line_count(&self) -> u32 {
        self.line_count
    }

    /// True if error recovery was needed anywhere in the file.
    pub fn has_errors(&self) -> bool {
        self.has_errors
    }
}

/// Convert grammar points to a 1-indexed inclusive line span.
///
/// A node ending at column 0 of a later row ends on the previous line.
fn line_span(start: Point, end: Point) -> (u32, u32) {
    let start_line = to_line(start.row);

    let end_line = if end.column == 0 && end.row > start.row {
        to_line(end.row - 1)
    } else {
        to_line(end.row)
    };

    (start_line, end_line)
}

fn to_line(row: usize) -> u32 {
    u32::try_from(row + 1).unwrap_or(u32::MAX)
}

fn scope_name(policy: &Policy, node: Node, source: &[u8]) -> Option<String> {
    let named = node.child_by_field_name("name").or_else(|| {
        let parent = node.parent()?;

        if policy.naming_parents.contains(&parent.kind()) {
            parent
                .child_by_field_name("name")
                .or_else(|| parent.child_by_field_name("key"))
                .or_else(|| parent.child_by_field_name("property"))
                .or_else(|| parent.child_by_field_name("left"))
        } else {
            None
        }
    })?;

    named.utf8_text(source).ok().map(str::to_owned)
}
