// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-language classification of grammar node kinds.

use crate::syntax::NodeKind;

/// Which grammar node kinds count as what.
#[derive(Debug)]
pub struct Policy {
    pub statements: &'static [&'static str],
    pub functions: &'static [&'static str],
    pub methods: &'static [&'static str],
    pub classes: &'static [&'static str],

    /// Pruned along with everything below them.
    pub non_executable: &'static [&'static str],

    /// Parents that name an anonymous function, e.g. `const f = () => {}`.
    pub naming_parents: &'static [&'static str],
}

impl Policy {
    pub fn classify(&self, kind: &str) -> NodeKind {
        if self.non_executable.contains(&kind) {
            NodeKind::NonExecutable
        } else if self.classes.contains(&kind) {
            NodeKind::ClassDef
        } else if self.methods.contains(&kind) {
            NodeKind::MethodDef
        } else if self.functions.contains(&kind) {
            NodeKind::FunctionDef
        } else if self.statements.contains(&kind) {
            NodeKind::Statement
        } else {
            NodeKind::Other
        }
    }
}

pub static PYTHON: Policy = Policy {
    statements: &[
        "assert_statement",
        "break_statement",
        "continue_statement",
        "delete_statement",
        "exec_statement",
        "expression_statement",
        "for_statement",
        "future_import_statement",
        "global_statement",
        "if_statement",
        "import_from_statement",
        "import_statement",
        "match_statement",
        "nonlocal_statement",
        "pass_statement",
        "print_statement",
        "raise_statement",
        "return_statement",
        "try_statement",
        "while_statement",
        "with_statement",
    ],
    functions: &["function_definition"],

    // Python methods are functions whose enclosing scope is a class.
    methods: &[],
    classes: &["class_definition"],
    non_executable: &["comment", "string", "type_alias_statement"],
    naming_parents: &[],
};

pub static JAVASCRIPT: Policy = Policy {
    statements: &[
        "break_statement",
        "continue_statement",
        "debugger_statement",
        "do_statement",
        "export_statement",
        "expression_statement",
        "for_in_statement",
        "for_statement",
        "if_statement",
        "import_statement",
        "labeled_statement",
        "lexical_declaration",
        "return_statement",
        "switch_statement",
        "throw_statement",
        "try_statement",
        "variable_declaration",
        "while_statement",
        "with_statement",
    ],
    functions: &[
        "arrow_function",
        "function_declaration",
        "function_expression",
        "generator_function",
        "generator_function_declaration",
    ],
    methods: &["method_definition"],
    classes: &["class", "class_declaration"],
    non_executable: &[
        "comment",
        "html_comment",
        "regex",
        "string",
        "template_string",
    ],
    naming_parents: &["variable_declarator", "pair", "assignment_expression", "field_definition"],
};
