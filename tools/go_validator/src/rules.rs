//! Static checks on a translation and the similar-entry merge helper.

use crate::naming::{go_name, normalized};
use python_analyzer::AnalysisRecord;
use std::collections::{BTreeMap, HashSet};

/// Markers that indicate unfinished code in a translation.
const UNFINISHED_MARKERS: &[&str] = &["TODO", "FIXME", "not implemented"];

/// Fraction of the Python file's functions, methods and classes whose Go counterpart name appears
/// as an identifier in `go_source`. Names are compared ignoring case and underscores. A file with
/// nothing to look for scores 1.
pub fn business_rule_coverage(analysis: &AnalysisRecord, go_source: &str) -> f64 {
    let identifiers: HashSet<String> = go_source
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(normalized)
        .collect();
    let mut expected: Vec<String> = analysis.classes.iter().map(|c| go_name(&c.name)).collect();
    for function in &analysis.functions {
        let name = match (function.name.as_str(), function.owner.as_deref()) {
            ("__init__", Some(class)) => format!("New{}", go_name(class)),
            (name, _) if name.starts_with("__") && name.ends_with("__") => continue,
            (name, _) => go_name(name),
        };
        expected.push(name);
    }
    if expected.is_empty() {
        return 1.0;
    }
    let found = expected
        .iter()
        .filter(|name| identifiers.contains(&normalized(name)))
        .count();
    found as f64 / expected.len() as f64
}

/// Number of unfinished-code markers in `go_source`.
pub fn unfinished_markers(go_source: &str) -> usize {
    UNFINISHED_MARKERS
        .iter()
        .map(|marker| go_source.matches(marker).count())
        .sum()
}

/// `1 - 0.1 * (vet diagnostics + unfinished markers)`, floored at 0.
pub fn lint_score(vet_diagnostics: usize, go_source: &str) -> f64 {
    let issues = vet_diagnostics + unfinished_markers(go_source);
    (1.0 - 0.1 * issues as f64).max(0.0)
}

/// An entry that can be combined with other entries sharing its key.
pub trait Mergeable {
    type Key: Ord;

    fn key(&self) -> Self::Key;

    /// Folds `other`, which has the same key, into `self`.
    fn absorb(&mut self, other: Self);

    /// Entries that must stay separate even when another entry shares their key.
    fn skip_merge(&self) -> bool {
        false
    }
}

/// Merges entries with equal keys. Mergeable entries come back sorted by key, followed by the
/// skipped entries in input order. For an `absorb` that is commutative and associative the result
/// does not depend on input order.
pub fn merge_similar<T: Mergeable>(entries: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut merged: BTreeMap<T::Key, T> = BTreeMap::new();
    let mut skipped = vec![];
    for entry in entries {
        if entry.skip_merge() {
            skipped.push(entry);
            continue;
        }
        match merged.entry(entry.key()) {
            std::collections::btree_map::Entry::Occupied(mut existing) => {
                existing.get_mut().absorb(entry)
            }
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
            }
        }
    }
    merged.into_values().chain(skipped).collect()
}

/// Reference [Mergeable]: named key fields plus named amounts in integer minor units, so sums are
/// exact. No particular set of business fields is assumed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyedAmounts {
    pub key: BTreeMap<String, String>,
    pub amounts: BTreeMap<String, i64>,
    pub skip_merge: bool,
}

impl KeyedAmounts {
    pub fn new<'a>(
        key: impl IntoIterator<Item = (&'a str, &'a str)>,
        amounts: impl IntoIterator<Item = (&'a str, i64)>,
    ) -> KeyedAmounts {
        KeyedAmounts {
            key: key
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            amounts: amounts
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            skip_merge: false,
        }
    }
}

impl Mergeable for KeyedAmounts {
    type Key = BTreeMap<String, String>;

    fn key(&self) -> Self::Key {
        self.key.clone()
    }

    fn absorb(&mut self, other: KeyedAmounts) {
        for (field, amount) in other.amounts {
            *self.amounts.entry(field).or_default() += amount;
        }
    }

    fn skip_merge(&self) -> bool {
        self.skip_merge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_counts_go_counterparts() {
        let analysis = python_analyzer::analyze(
            "class GLEntry:\n    def __init__(self):\n        pass\n    def __repr__(self):\n        pass\n    def validate(self):\n        pass\n\ndef make_gl_entries(gl_map):\n    pass\n\ndef _round_off(x):\n    pass\n",
        )
        .unwrap();
        let go = "package ledger\n\ntype GLEntry struct{}\n\nfunc NewGLEntry() *GLEntry { return &GLEntry{} }\n\nfunc (e *GLEntry) Validate() error { return nil }\n\nfunc makeGlEntries(glMap []any) {}\n";
        // GLEntry, NewGLEntry, Validate, MakeGlEntries found; roundOff missing.
        assert_eq!(business_rule_coverage(&analysis, go), 0.8);
        assert_eq!(business_rule_coverage(&AnalysisRecord::default(), ""), 1.0);
    }

    #[test]
    fn lint_counts_markers() {
        assert_eq!(lint_score(0, "package x\n"), 1.0);
        let stub = "// TODO: port\nreturn errors.New(\"not implemented: f\")\n";
        assert_eq!(unfinished_markers(stub), 2);
        assert!((lint_score(1, stub) - 0.7).abs() < 1e-9);
        assert_eq!(lint_score(20, ""), 0.0);
    }

    fn entry(account: &str, cost_center: &str, debit: i64, credit: i64) -> KeyedAmounts {
        KeyedAmounts::new(
            [("account", account), ("cost_center", cost_center)],
            [("debit", debit), ("credit", credit)],
        )
    }

    #[test]
    fn merging_sums_amounts_per_key() {
        let merged = merge_similar([
            entry("Debtors", "Main", 100, 0),
            entry("Sales", "Main", 0, 100),
            entry("Debtors", "Main", 250, 5),
            entry("Debtors", "Main", 1, 0),
        ]);
        assert_eq!(
            merged,
            [entry("Debtors", "Main", 351, 5), entry("Sales", "Main", 0, 100)]
        );
    }

    #[test]
    fn merging_is_order_independent() {
        let entries = [
            entry("Debtors", "Main", 100, 0),
            entry("Debtors", "Main", 0, 40),
            entry("Sales", "Main", 0, 100),
            entry("Debtors", "East", 7, 0),
            entry("Debtors", "Main", 3, 3),
        ];
        let expected = merge_similar(entries.clone());
        // Every rotation and the reversal give the same result.
        for shift in 0..entries.len() {
            let mut rotated = entries.to_vec();
            rotated.rotate_left(shift);
            assert_eq!(merge_similar(rotated.clone()), expected);
            rotated.reverse();
            assert_eq!(merge_similar(rotated), expected);
        }
    }

    #[test]
    fn skipped_entries_stay_separate() {
        let mut pinned = entry("Debtors", "Main", 5, 0);
        pinned.skip_merge = true;
        let merged = merge_similar([pinned.clone(), entry("Debtors", "Main", 1, 0)]);
        assert_eq!(merged, [entry("Debtors", "Main", 1, 0), pinned]);
    }
}
