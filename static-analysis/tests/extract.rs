// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use coverage::SourcePath;
use pretty_assertions::assert_eq;
use static_analysis::{
    FileFacts, GrammarRegistry, LabelKind, ParseOutcome, SourceFile, StructuralFact,
};

const SHAPES: &str = include_str!("test-data/shapes.py");
const CART: &str = include_str!("test-data/cart.js");
const BROKEN: &str = include_str!("test-data/broken.py");

fn analyze(registry: &GrammarRegistry, path: &str, text: &str) -> Result<FileFacts> {
    let file = SourceFile::new(SourcePath::new(path)?, text.as_bytes().to_vec(), None);

    match registry.parse(&file) {
        ParseOutcome::Parsed(tree) => Ok(FileFacts::new(&file, &tree)),
        outcome => bail!("unexpected parse outcome: {:?}", outcome),
    }
}

/// (label, kind, start, end, parent)
type Row = (String, LabelKind, u32, u32, Option<String>);

fn summary(facts: &[StructuralFact]) -> Vec<Row> {
    facts
        .iter()
        .map(|fact| {
            (
                fact.label.to_string(),
                fact.kind,
                fact.start_line.number(),
                fact.end_line.number(),
                fact.parent.as_ref().map(|p| p.to_string()),
            )
        })
        .collect()
}

fn some(label: &str) -> Option<String> {
    Some(label.to_owned())
}

#[test]
fn test_python_facts() -> Result<()> {
    let registry = GrammarRegistry::new()?;
    let facts = analyze(&registry, "pkg/shapes.py", SHAPES)?;

    assert_eq!(facts.line_count, 18);

    let class = "pkg/shapes.py::class::Circle#0";
    let init = "pkg/shapes.py::method::Circle.__init__#0";
    let area = "pkg/shapes.py::method::Circle.area#0";
    let describe = "pkg/shapes.py::function::describe#0";

    use LabelKind::*;

    let expected: Vec<Row> = vec![
        ("pkg/shapes.py::statement::<module>#0".into(), Statement, 1, 1, None),
        (class.into(), Class, 4, 13, None),
        ("pkg/shapes.py::statement::Circle#0".into(), Statement, 5, 5, some(class)),
        (init.into(), Method, 7, 8, some(class)),
        ("pkg/shapes.py::statement::Circle.__init__#0".into(), Statement, 8, 8, some(init)),
        (area.into(), Method, 10, 13, some(class)),
        ("pkg/shapes.py::statement::Circle.area#0".into(), Statement, 11, 12, some(area)),
        ("pkg/shapes.py::statement::Circle.area#1".into(), Statement, 12, 12, some(area)),
        ("pkg/shapes.py::statement::Circle.area#2".into(), Statement, 13, 13, some(area)),
        (describe.into(), Function, 16, 18, None),
        ("pkg/shapes.py::statement::describe#0".into(), Statement, 18, 18, some(describe)),
    ];

    assert_eq!(summary(&facts.facts), expected);

    let area_fact = &facts.facts[5];
    assert_eq!(area_fact.name, "area");
    assert_eq!(area_fact.scope, vec!["Circle".to_owned()]);

    Ok(())
}

#[test]
fn test_javascript_facts() -> Result<()> {
    let registry = GrammarRegistry::new()?;
    let facts = analyze(&registry, "web/cart.js", CART)?;

    let class = "web/cart.js::class::Cart#0";
    let ctor = "web/cart.js::method::Cart.constructor#0";
    let total = "web/cart.js::method::Cart.total#0";
    let reducer = "web/cart.js::function::Cart.total.<anonymous>#0";
    let discount = "web/cart.js::function::discount#0";

    use LabelKind::*;

    let expected: Vec<Row> = vec![
        ("web/cart.js::statement::<module>#0".into(), Statement, 1, 1, None),
        ("web/cart.js::statement::<module>#1".into(), Statement, 3, 11, None),
        (class.into(), Class, 3, 11, None),
        (ctor.into(), Method, 4, 6, some(class)),
        ("web/cart.js::statement::Cart.constructor#0".into(), Statement, 5, 5, some(ctor)),
        (total.into(), Method, 8, 10, some(class)),
        ("web/cart.js::statement::Cart.total#0".into(), Statement, 9, 9, some(total)),
        (reducer.into(), Function, 9, 9, some(total)),
        ("web/cart.js::statement::<module>#2".into(), Statement, 13, 15, None),
        (discount.into(), Function, 13, 15, None),
        ("web/cart.js::statement::discount#0".into(), Statement, 14, 14, some(discount)),
    ];

    assert_eq!(summary(&facts.facts), expected);

    Ok(())
}

#[test]
fn test_partial_parse_keeps_valid_regions() -> Result<()> {
    let registry = GrammarRegistry::new()?;
    let facts = analyze(&registry, "broken.py", BROKEN)?;

    let labels: Vec<_> = facts.facts.iter().map(|f| f.label.as_str()).collect();

    assert!(labels.contains(&"broken.py::function::ok#0"));
    assert!(labels.contains(&"broken.py::statement::ok#0"));
    assert!(facts.facts.iter().all(|f| !f.name.contains("ERROR")));

    Ok(())
}

#[test]
fn test_extraction_is_deterministic() -> Result<()> {
    let registry = GrammarRegistry::new()?;

    for (path, text) in [("a.py", SHAPES), ("b.js", CART), ("c.py", BROKEN)] {
        let first = analyze(&registry, path, text)?;
        let second = analyze(&registry, path, text)?;

        assert_eq!(first, second);
    }

    Ok(())
}

#[test]
fn test_labels_are_unique_and_in_range() -> Result<()> {
    let registry = GrammarRegistry::new()?;

    for (path, text) in [("a.py", SHAPES), ("b.js", CART), ("c.py", BROKEN)] {
        let facts = analyze(&registry, path, text)?;

        let mut labels: Vec<_> = facts.facts.iter().map(|f| &f.label).collect();
        labels.sort();
        labels.dedup();
        assert_eq!(labels.len(), facts.facts.len());

        for fact in &facts.facts {
            assert!(fact.start_line <= fact.end_line);
            assert!(fact.end_line.number() <= facts.line_count);
        }
    }

    Ok(())
}

#[test]
fn test_dotted_js_names_keep_labels_unique() -> Result<()> {
    let registry = GrammarRegistry::new()?;

    // `a.b` + `c` and `a` + `b.c` must not collapse into one scope chain.
    let text = "a.b = function () { c = function () {}; };\n\
                a = function () { b.c = function () {}; };\n";
    let facts = analyze(&registry, "f.js", text)?;

    let labels: BTreeSet<_> = facts.facts.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels.len(), facts.facts.len());

    assert!(labels.contains("f.js::function::`a.b`.c#0"));
    assert!(labels.contains("f.js::function::a.`b.c`#0"));

    // Every parent link still resolves to exactly one fact.
    for fact in &facts.facts {
        if let Some(parent) = &fact.parent {
            assert!(labels.contains(parent.as_str()));
        }
    }

    Ok(())
}

#[test]
fn test_facts_survive_serialization() -> Result<()> {
    let registry = GrammarRegistry::new()?;
    let facts = analyze(&registry, "pkg/shapes.py", SHAPES)?;

    let json = serde_json::to_value(&facts)?;
    assert_eq!(json["language"], "python");
    assert_eq!(json["facts"][0]["label"], "pkg/shapes.py::statement::<module>#0");

    let parsed: FileFacts = serde_json::from_value(json)?;
    assert_eq!(parsed, facts);

    Ok(())
}

#[test]
fn test_unchanged_structure_keeps_labels() -> Result<()> {
    let registry = GrammarRegistry::new()?;

    // Inserting a line shifts ranges but not identities.
    let shifted = format!("import os\n{SHAPES}");
    let before = analyze(&registry, "s.py", SHAPES)?;
    let after = analyze(&registry, "s.py", &shifted)?;

    let area = |facts: &FileFacts| {
        facts
            .facts
            .iter()
            .find(|f| f.label.as_str() == "s.py::method::Circle.area#0")
            .map(|f| f.start_line.number())
    };

    assert_eq!(area(&before), Some(10));
    assert_eq!(area(&after), Some(11));

    Ok(())
}
