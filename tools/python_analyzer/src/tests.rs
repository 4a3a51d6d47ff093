use super::*;

const INVOICE: &str = r#""""Sales invoice handling."""
import os
import frappe.utils as fu
from erpnext.accounts import general_ledger, party as p
from .models import *


class SalesInvoice(Document, metaclass=Meta):
    """Invoice document."""

    def validate(self, strict=False):
        self.set_totals()
        total = compute_total(self.items)

    def set_totals(self, *args, **kwargs):
        pass


# Computes the grand total.
# Ignores cancelled rows.
@frappe.whitelist()
def compute_total(items: list, rate: float = 1.0):
    def inner(x):
        return round_off(x)

    return sum(inner(i) for i in items)


def round_off(value):
    return value
"#;

fn invoice() -> AnalysisRecord {
    analyze(INVOICE).unwrap()
}

#[test]
fn imports_are_module_qualified() {
    assert_eq!(
        invoice().imports,
        [
            "os",
            "frappe.utils",
            "erpnext.accounts.general_ledger",
            "erpnext.accounts.party",
            ".models.*",
        ]
    );
    assert_eq!(
        invoice().imported_modules(),
        ["os", "frappe", "erpnext", "models"]
    );
}

#[test]
fn classes_have_direct_bases_and_methods() {
    let record = invoice();
    assert_eq!(record.classes.len(), 1);
    let class = &record.classes[0];
    assert_eq!(class.name, "SalesInvoice");
    assert_eq!(class.bases, ["Document"]);
    assert_eq!(class.methods, ["validate", "set_totals"]);
    assert_eq!(class.doc.as_deref(), Some("Invoice document."));
}

#[test]
fn functions_have_params_docs_and_lines() {
    let record = invoice();
    let names: Vec<_> = record
        .functions
        .iter()
        .map(|f| f.qualified_name.as_str())
        .collect();
    assert_eq!(
        names,
        [
            "SalesInvoice.validate",
            "SalesInvoice.set_totals",
            "compute_total",
            "compute_total.inner",
            "round_off",
        ]
    );
    let set_totals = &record.functions[1];
    assert_eq!(set_totals.params, ["self", "args", "kwargs"]);
    assert_eq!(set_totals.owner.as_deref(), Some("SalesInvoice"));

    let compute_total = &record.functions[2];
    assert_eq!(compute_total.params, ["items", "rate"]);
    assert_eq!(
        compute_total.doc.as_deref(),
        Some("Computes the grand total.\nIgnores cancelled rows.")
    );
    assert_eq!(compute_total.start_line, 21);
    assert_eq!(compute_total.end_line, 26);
    assert_eq!(record.functions[4].doc, None);

    let top: Vec<_> = record.top_level_functions().map(|f| &f.name).collect();
    assert_eq!(top, ["compute_total", "round_off"]);
    assert_eq!(record.methods_of("SalesInvoice").count(), 2);
    assert_eq!(record.module_doc.as_deref(), Some("Sales invoice handling."));
}

#[test]
fn call_graph_is_same_file_and_excludes_nested_bodies() {
    let record = invoice();
    let calls = |name: &str| -> Vec<String> {
        record.call_graph[name].iter().cloned().collect()
    };
    assert_eq!(calls("SalesInvoice.validate"), ["compute_total", "set_totals"]);
    // `sum` is not defined here; `round_off` is only called by the nested function.
    assert_eq!(calls("compute_total"), ["inner"]);
    assert_eq!(calls("compute_total.inner"), ["round_off"]);
    assert!(calls("round_off").is_empty());
}

#[test]
fn syntax_errors_are_reported_with_position() {
    let error = analyze("def ok():\n    return 1\n\ndef broken(:\n    pass\n").unwrap_err();
    assert_eq!(error.line, 4);
    assert!(analyze("x = (1, 2\n").is_err());
}

#[test]
fn non_utf8_is_a_syntax_error() {
    let error = analyze_bytes(b"x = 1\ny = '\xff'\n").unwrap_err();
    assert_eq!(error.line, 2);
}

#[test]
fn empty_module() {
    assert_eq!(analyze("").unwrap(), AnalysisRecord::default());
}
