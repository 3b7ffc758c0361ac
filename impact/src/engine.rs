// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::{BTreeMap, BTreeSet};

use coverage::SourcePath;
use serde::{Deserialize, Serialize};
use static_analysis::{LabelId, LabelKind, StructuralFact};

use crate::diff::{ChangeSet, LineRange};

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactReason {
    /// The label's range intersects a changed range.
    DirectlyChanged,

    /// A changed line lies inside the label's range.
    ContainsChangedLine,

    /// A label nested inside this one is impacted.
    AncestorOfChangedScope,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ImpactedLabel {
    pub label: LabelId,
    pub kind: LabelKind,
    pub path: SourcePath,
    pub reasons: BTreeSet<ImpactReason>,
}

/// Impacted labels, ordered and deduplicated by label id.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ImpactSet {
    labels: BTreeMap<LabelId, ImpactedLabel>,
}

impl ImpactSet {
    pub fn get(&self, label: &LabelId) -> Option<&ImpactedLabel> {
        self.labels.get(label)
    }

    pub fn contains(&self, label: &LabelId) -> bool {
        self.labels.contains_key(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImpactedLabel> {
        self.labels.values()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Fold in another set, unioning the reasons of shared labels.
    pub fn extend(&mut self, other: ImpactSet) {
        for (id, label) in other.labels {
            match self.labels.get_mut(&id) {
                Some(existing) => existing.reasons.extend(label.reasons),
                None => {
                    self.labels.insert(id, label);
                }
            }
        }
    }

    fn mark(&mut self, fact: &StructuralFact, reason: ImpactReason) {
        self.labels
            .entry(fact.label.clone())
            .or_insert_with(|| ImpactedLabel {
                label: fact.label.clone(),
                kind: fact.kind,
                path: fact.path.clone(),
                reasons: BTreeSet::new(),
            })
            .reasons
            .insert(reason);
    }
}

/// Facts of a set of files, with the scope tree recovered from parent links.
#[derive(Debug, Default)]
pub struct FactIndex<'a> {
    by_path: BTreeMap<&'a SourcePath, Vec<&'a StructuralFact>>,
    by_label: BTreeMap<&'a LabelId, &'a StructuralFact>,
}

impl<'a> FactIndex<'a> {
    pub fn new(facts: impl IntoIterator<Item = &'a StructuralFact>) -> Self {
        let mut index = Self::default();

        for fact in facts {
            index.by_path.entry(&fact.path).or_default().push(fact);
            index.by_label.insert(&fact.label, fact);
        }

        index
    }

    pub fn get(&self, label: &LabelId) -> Option<&'a StructuralFact> {
        self.by_label.get(label).copied()
    }

    pub fn facts(&self, path: &SourcePath) -> &[&'a StructuralFact] {
        self.by_path.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    /// Enclosing scopes of `fact`, innermost first.
    pub fn ancestors(&self, fact: &'a StructuralFact) -> Ancestors<'_, 'a> {
        Ancestors {
            index: self,
            next: fact.parent.as_ref(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_label.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_label.is_empty()
    }
}

pub struct Ancestors<'i, 'a> {
    index: &'i FactIndex<'a>,
    next: Option<&'a LabelId>,
}

impl<'i, 'a> Iterator for Ancestors<'i, 'a> {
    type Item = &'a StructuralFact;

    fn next(&mut self) -> Option<Self::Item> {
        let fact = self.index.get(self.next?)?;
        self.next = fact.parent.as_ref();
        Some(fact)
    }
}

/// Labels affected by the added lines of `changes`.
pub fn impact(index: &FactIndex, changes: &ChangeSet) -> ImpactSet {
    let mut impacted = ImpactSet::default();

    for hunk in changes.hunks() {
        mark_ranges(index, &hunk.path, &hunk.added, &mut impacted);
    }

    impacted
}

/// Like [`impact`], but also evaluates removed lines, which only make sense
/// against the facts of the base revision.
///
/// Without base facts, removed ranges are ignored.
pub fn impact_with_history(
    current: &FactIndex,
    base: Option<&FactIndex>,
    changes: &ChangeSet,
) -> ImpactSet {
    let mut impacted = impact(current, changes);

    match base {
        Some(base) => {
            let mut historical = ImpactSet::default();

            for hunk in changes.hunks() {
                mark_ranges(base, &hunk.path, &hunk.removed, &mut historical);
            }

            impacted.extend(historical);
        }
        None => {
            let removed: usize = changes.hunks().map(|hunk| hunk.removed.len()).sum();

            if removed > 0 {
                debug!("ignoring {} removed ranges without base facts", removed);
            }
        }
    }

    impacted
}

fn mark_ranges(
    index: &FactIndex,
    path: &SourcePath,
    ranges: &[LineRange],
    impacted: &mut ImpactSet,
) {
    if ranges.is_empty() {
        return;
    }

    for &fact in index.facts(path) {
        let direct = ranges
            .iter()
            .any(|range| range.intersects(fact.start_line, fact.end_line));

        // The first changed line at or after the label's start is the only
        // candidate worth testing.
        let contains = ranges.iter().any(|range| {
            let line = range.start.max(fact.start_line);
            range.contains(line) && fact.contains(line)
        });

        if direct {
            impacted.mark(fact, ImpactReason::DirectlyChanged);
        }

        if contains {
            impacted.mark(fact, ImpactReason::ContainsChangedLine);
        }

        if direct || contains {
            for ancestor in index.ancestors(fact) {
                impacted.mark(ancestor, ImpactReason::AncestorOfChangedScope);
            }
        }
    }
}
