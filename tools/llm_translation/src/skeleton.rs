//! Go skeleton generated from the analysis alone, used when inference keeps failing.
//!
//! The skeleton always passes the syntax check: one struct per class, a constructor for each
//! `__init__`, and stubs for every method and top-level function that return a "not implemented"
//! error.

use go_validator::naming::{go_local_name, go_name};
use python_analyzer::{AnalysisRecord, FunctionDecl};
use std::collections::HashSet;
use std::fmt::Write as _;

const RECEIVER: &str = "r";

/// Returns `base`, or `base` with the smallest numeric suffix that is not in `taken`, and marks
/// the result as taken.
fn unique(taken: &mut HashSet<String>, base: String) -> String {
    let mut name = base.clone();
    let mut n = 2;
    while !taken.insert(name.clone()) {
        name = format!("{base}{n}");
        n += 1;
    }
    name
}

fn doc_line(doc: Option<&str>) -> Option<&str> {
    doc.and_then(|d| d.lines().map(str::trim).find(|l| !l.is_empty()))
}

/// `name any, other any` for the parameters of `function`, skipping `self` and `cls` on methods.
fn params(function: &FunctionDecl) -> String {
    let mut taken = HashSet::new();
    if function.owner.is_some() {
        taken.insert(RECEIVER.to_string());
    }
    let skip = usize::from(
        function.owner.is_some()
            && function
                .params
                .first()
                .is_some_and(|p| p == "self" || p == "cls"),
    );
    function.params[skip..]
        .iter()
        .map(|p| format!("{} any", unique(&mut taken, go_local_name(p))))
        .collect::<Vec<_>>()
        .join(", ")
}

fn stub_body(out: &mut String, returns: &str, what: &str) {
    let _ = writeln!(out, "\treturn {returns}errors.New(\"not implemented: {what}\")");
    out.push_str("}\n");
}

/// Builds the skeleton for `file_name`, in Go package `package`.
pub fn skeleton(package: &str, file_name: &str, analysis: &AnalysisRecord) -> String {
    let mut body = String::new();
    let mut top_level = HashSet::new();
    let mut stubs = 0;

    for class in &analysis.classes {
        let type_name = unique(&mut top_level, go_name(&class.name));
        body.push('\n');
        if let Some(doc) = doc_line(class.doc.as_deref()) {
            let _ = writeln!(body, "// {type_name} ports {}: {doc}", class.name);
        } else {
            let _ = writeln!(body, "// {type_name} ports {}.", class.name);
        }
        let _ = writeln!(body, "type {type_name} struct{{}}");

        let mut methods = HashSet::new();
        for method in analysis.methods_of(&class.name) {
            let what = format!("{}.{}", class.name, method.name);
            body.push('\n');
            stubs += 1;
            if method.name == "__init__" {
                let constructor = unique(&mut top_level, format!("New{type_name}"));
                let _ = writeln!(
                    body,
                    "func {constructor}({}) (*{type_name}, error) {{",
                    params(method)
                );
                stub_body(&mut body, "nil, ", &what);
                continue;
            }
            let name = unique(&mut methods, go_name(&method.name));
            let _ = writeln!(
                body,
                "func ({RECEIVER} *{type_name}) {name}({}) error {{",
                params(method)
            );
            stub_body(&mut body, "", &what);
        }
    }

    for function in analysis.top_level_functions() {
        let name = unique(&mut top_level, go_name(&function.name));
        body.push('\n');
        if let Some(doc) = doc_line(function.doc.as_deref()) {
            let _ = writeln!(body, "// {name} ports {}: {doc}", function.name);
        }
        let _ = writeln!(body, "func {name}({}) error {{", params(function));
        stub_body(&mut body, "", &function.name);
        stubs += 1;
    }

    let mut out = format!(
        "// Code generated from {file_name} without a model translation. Port each stub by hand.\n\npackage {package}\n"
    );
    if stubs > 0 {
        out.push_str("\nimport \"errors\"\n");
    }
    out.push_str(&body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use go_validator::validate_syntax;

    const LEDGER: &str = r#"
class GLEntry:
    """A general ledger posting."""
    def __init__(self, account, amount):
        self.account = account
    def validate(self):
        pass
    def Validate(self, strict):
        pass

class gl_entry:
    pass

def make_gl_entries(gl_map, r, type):
    """Post entries.

    Longer description.
    """
    pass

def _round_off(x):
    def inner():
        pass
    return x
"#;

    #[test]
    fn skeleton_covers_every_declaration() {
        let analysis = python_analyzer::analyze(LEDGER).unwrap();
        let go = skeleton("ledger", "gl.py", &analysis);
        assert!(validate_syntax(&go).valid, "{go}");
        assert!(go.starts_with("// Code generated from gl.py"));
        assert!(go.contains("package ledger\n\nimport \"errors\"\n"));
        assert!(go.contains("// GLEntry ports GLEntry: A general ledger posting.\ntype GLEntry struct{}\n"));
        assert!(go.contains(
            "func NewGLEntry(account any, amount any) (*GLEntry, error) {\n\treturn nil, errors.New(\"not implemented: GLEntry.__init__\")\n}\n"
        ));
        assert!(go.contains("func (r *GLEntry) Validate() error {"));
        // The second `Validate` gets a suffix.
        assert!(go.contains("func (r *GLEntry) Validate2(strict any) error {"));
        assert!(go.contains("// GlEntry ports gl_entry.\ntype GlEntry struct{}\n"));
        assert!(go.contains("// MakeGlEntries ports make_gl_entries: Post entries.\n"));
        assert!(go.contains("func MakeGlEntries(glMap any, r any, type_ any) error {"));
        assert!(go.contains("func roundOff(x any) error {"));
        assert!(!go.contains("inner"));
    }

    #[test]
    fn method_params_do_not_shadow_the_receiver() {
        let analysis =
            python_analyzer::analyze("class A:\n    def f(self, r, r_):\n        pass\n").unwrap();
        let go = skeleton("common", "a.py", &analysis);
        assert!(go.contains("func (r *A) F(r2 any, r3 any) error {"), "{go}");
    }

    #[test]
    fn names_go_already_uses_are_renamed() {
        let source = "def _init(errors, nil):\n    pass\n\nclass Cart:\n    def add(self, error, len):\n        pass\n";
        let analysis = python_analyzer::analyze(source).unwrap();
        let go = skeleton("common", "cart.py", &analysis);
        assert!(go.contains("func init_(errors_ any, nil_ any) error {\n\treturn errors.New("), "{go}");
        assert!(go.contains("func (r *Cart) Add(error_ any, len_ any) error {"), "{go}");
        assert!(!go.contains("func init("));
        assert!(validate_syntax(&go).valid, "{go}");
    }

    #[test]
    fn empty_module_has_no_import() {
        let go = skeleton("common", "consts.py", &AnalysisRecord::default());
        assert_eq!(
            go,
            "// Code generated from consts.py without a model translation. Port each stub by hand.\n\npackage common\n"
        );
        assert!(validate_syntax(&go).valid);
    }
}
