//! Short natural-language summaries derived from an [AnalysisRecord].

use python_analyzer::{AnalysisRecord, ClassDecl, FunctionDecl};

/// Business domains, checked in order; the first whose keyword appears wins.
const DOMAINS: &[(&[&str], &str)] = &[
    (&["invoice", "sales", "purchase"], "Invoice processing"),
    (&["ledger", "journal", "entry"], "Ledger management"),
    (&["tax", "vat", "gst"], "Tax calculation"),
    (&["party", "customer", "supplier"], "Party management"),
    (&["payment", "receipt"], "Payment handling"),
];

const DEFAULT_DOMAIN: &str = "Accounting utility";

const FUNCTION_PURPOSES: &[(&str, &str)] = &[
    ("get_", "Retrieves data"),
    ("set_", "Sets data"),
    ("validate_", "Validates business rules"),
    ("calculate_", "Performs calculations"),
    ("make_", "Creates entries"),
    ("update_", "Updates records"),
    ("delete_", "Deletes records"),
];

const CLASS_PURPOSES: &[(&str, &str)] = &[
    ("service", "Service layer for business logic"),
    ("controller", "Controller for request handling"),
    ("manager", "Manager for coordinating operations"),
    ("validator", "Validator for business rules"),
];

/// Classifies a file into a business domain from its name, module docstring and imports.
pub fn detect_domain(stem: &str, record: &AnalysisRecord) -> &'static str {
    let mut text = stem.to_lowercase();
    if let Some(ref doc) = record.module_doc {
        text.push(' ');
        text.push_str(&doc.to_lowercase());
    }
    for import in &record.imports {
        text.push(' ');
        text.push_str(&import.to_lowercase());
    }
    DOMAINS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| text.contains(k)))
        .map_or(DEFAULT_DOMAIN, |(_, domain)| *domain)
}

pub fn file_meaning(stem: &str, record: &AnalysisRecord) -> String {
    let mut meaning = format!("File {stem}: {}. ", detect_domain(stem, record));
    if let Some(ref doc) = record.module_doc {
        meaning.push_str(&format!("{}. ", truncate(doc, 100).trim_end_matches('.')));
    }
    meaning.push_str(&format!(
        "Contains {} functions and {} classes.",
        record.functions.len(),
        record.classes.len()
    ));
    meaning
}

pub fn function_meaning(function: &FunctionDecl) -> String {
    let purpose = match function.doc {
        Some(ref doc) => truncate(doc, 150),
        None => function_purpose(&function.name).to_string(),
    };
    format!(
        "Function {}({}): {purpose}",
        function.name,
        function.params.join(", ")
    )
}

pub fn class_meaning(class: &ClassDecl) -> String {
    let purpose = match class.doc {
        Some(ref doc) => truncate(doc, 150),
        None => class_purpose(&class.name).to_string(),
    };
    format!(
        "Class {}: {purpose} Contains {} methods.",
        class.name,
        class.methods.len()
    )
}

/// One relation per imported top-level module, with the symbols taken from it.
pub fn relation_meanings(stem: &str, record: &AnalysisRecord) -> Vec<(String, String)> {
    record
        .imported_modules()
        .into_iter()
        .map(|module| {
            let symbols: Vec<&str> = record
                .imports
                .iter()
                .filter(|import| {
                    let trimmed = import.trim_start_matches('.');
                    trimmed == module || trimmed.starts_with(&format!("{module}."))
                })
                .map(String::as_str)
                .collect();
            let meaning = format!(
                "Dependency from {stem} to {module}: uses {}",
                symbols.join(", ")
            );
            (module, meaning)
        })
        .collect()
}

pub fn function_purpose(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    FUNCTION_PURPOSES
        .iter()
        .find(|(prefix, _)| lower.starts_with(prefix))
        .map_or("Performs business logic", |(_, purpose)| *purpose)
}

pub fn class_purpose(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    CLASS_PURPOSES
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map_or("Data model or utility class", |(_, purpose)| *purpose)
}

/// First `max` characters of `text`, with runs of whitespace collapsed to one space.
fn truncate(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max).collect()
}
