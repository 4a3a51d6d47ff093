//! Static structural analysis of Python source files.
//!
//! The source is parsed with tree-sitter and never executed. The resulting [AnalysisRecord] holds
//! the file's imports, classes, functions and a same-file call graph; it is cached by the
//! structural cache and feeds the semantic index, the prompt and the skeleton fallback.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;
use tree_sitter::{Node, Parser};

#[cfg(test)]
mod tests;

/// The content could not be parsed as Python.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("syntax error at line {line}, column {column}: {message}")]
pub struct SyntaxError {
    /// 1-based.
    pub line: usize,
    /// 1-based.
    pub column: usize,
    pub message: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct AnalysisRecord {
    /// Module-qualified imported names, in source order.
    pub imports: Vec<String>,
    pub classes: Vec<ClassDecl>,
    /// Every function in the file: top-level, methods and nested functions.
    pub functions: Vec<FunctionDecl>,
    /// Qualified function name to the bare names it calls that are defined in this file.
    pub call_graph: BTreeMap<String, BTreeSet<String>>,
    pub module_doc: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct ClassDecl {
    pub name: String,
    /// Direct base classes as written.
    pub bases: Vec<String>,
    /// Methods defined directly in the class body.
    pub methods: Vec<String>,
    pub doc: Option<String>,
    pub line: usize,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct FunctionDecl {
    pub name: String,
    /// `Class.method` for methods, `outer.inner` for nested functions.
    pub qualified_name: String,
    /// Enclosing class, for methods.
    pub owner: Option<String>,
    pub params: Vec<String>,
    pub doc: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
}

impl AnalysisRecord {
    /// Functions that are neither methods nor nested in another function.
    pub fn top_level_functions(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.functions
            .iter()
            .filter(|f| f.owner.is_none() && f.qualified_name == f.name)
    }

    /// Methods defined directly in `class`.
    pub fn methods_of<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a FunctionDecl> {
        self.functions
            .iter()
            .filter(move |f| f.owner.as_deref() == Some(class))
    }

    /// Top-level imported module names (`a.b.x` → `a`), deduplicated in first-seen order.
    pub fn imported_modules(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.imports
            .iter()
            .filter_map(|import| {
                let trimmed = import.trim_start_matches('.');
                let module = trimmed.split('.').next().unwrap_or(trimmed);
                (!module.is_empty() && module != "*" && seen.insert(module.to_string()))
                    .then(|| module.to_string())
            })
            .collect()
    }
}

/// Parses `content` and extracts its structure.
pub fn analyze(content: &str) -> Result<AnalysisRecord, SyntaxError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::language())
        .map_err(|e| SyntaxError {
            line: 0,
            column: 0,
            message: format!("failed to load Python grammar: {e}"),
        })?;
    let tree = parser.parse(content, None).ok_or_else(|| SyntaxError {
        line: 0,
        column: 0,
        message: "parser produced no tree".into(),
    })?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(first_error(root).unwrap_or(SyntaxError {
            line: 1,
            column: 1,
            message: "invalid syntax".into(),
        }));
    }

    let mut extractor = Extractor {
        src: content.as_bytes(),
        lines: content.lines().collect(),
        record: AnalysisRecord::default(),
        bodies: Vec::new(),
    };
    extractor.record.module_doc = docstring(root, extractor.src);
    extractor.block(root, &Scope::Module);

    let known: BTreeSet<String> = extractor
        .record
        .functions
        .iter()
        .map(|f| f.name.clone())
        .collect();
    for (qualified_name, body) in std::mem::take(&mut extractor.bodies) {
        let mut called = BTreeSet::new();
        collect_calls(body, extractor.src, &known, &mut called);
        extractor.record.call_graph.insert(qualified_name, called);
    }
    debug!(
        imports = extractor.record.imports.len(),
        classes = extractor.record.classes.len(),
        functions = extractor.record.functions.len(),
        "Analyzed Python module"
    );
    Ok(extractor.record)
}

/// Like [analyze], for raw bytes. Content that is not UTF-8 is a syntax error.
pub fn analyze_bytes(content: &[u8]) -> Result<AnalysisRecord, SyntaxError> {
    let text = std::str::from_utf8(content).map_err(|e| {
        let line = content[..e.valid_up_to()]
            .iter()
            .filter(|&&b| b == b'\n')
            .count();
        SyntaxError {
            line: line + 1,
            column: 1,
            message: "file is not valid UTF-8".into(),
        }
    })?;
    analyze(text)
}

/// Returns the position of the first ERROR or MISSING node, in document order.
fn first_error(node: Node) -> Option<SyntaxError> {
    if node.is_error() || node.is_missing() {
        let position = node.start_position();
        let message = if node.is_missing() {
            format!("missing {}", node.kind())
        } else {
            "invalid syntax".to_string()
        };
        return Some(SyntaxError {
            line: position.row + 1,
            column: position.column + 1,
            message,
        });
    }
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .filter(|child| child.has_error())
        .find_map(first_error)
}

enum Scope {
    Module,
    Class(String),
    Function(String),
}

struct Extractor<'t> {
    src: &'t [u8],
    lines: Vec<&'t str>,
    record: AnalysisRecord,
    /// Function bodies awaiting call graph extraction, by qualified name.
    bodies: Vec<(String, Node<'t>)>,
}

impl<'t> Extractor<'t> {
    fn text(&self, node: Node) -> String {
        node.utf8_text(self.src).unwrap_or_default().to_string()
    }

    /// Visits the statements of a module or block.
    fn block(&mut self, block: Node<'t>, scope: &Scope) {
        let mut cursor = block.walk();
        for statement in block.named_children(&mut cursor) {
            self.statement(statement, statement, scope);
        }
    }

    /// `outer` is the node whose start line is used for doc comment lookup; it differs from
    /// `node` for decorated definitions.
    fn statement(&mut self, node: Node<'t>, outer: Node<'t>, scope: &Scope) {
        match node.kind() {
            "import_statement" => self.import(node),
            "import_from_statement" => self.import_from(node),
            "class_definition" => self.class(node, outer),
            "function_definition" => self.function(node, outer, scope),
            "decorated_definition" => {
                if let Some(definition) = node.child_by_field_name("definition") {
                    self.statement(definition, outer, scope);
                }
            }
            "block" => self.block(node, scope),
            // Definitions nested in control flow still belong to the enclosing scope.
            "if_statement" | "elif_clause" | "else_clause" | "for_statement"
            | "while_statement" | "try_statement" | "except_clause" | "finally_clause"
            | "with_statement" => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    if matches!(
                        child.kind(),
                        "block" | "elif_clause" | "else_clause" | "except_clause" | "finally_clause"
                    ) {
                        self.statement(child, child, scope);
                    }
                }
            }
            _ => {}
        }
    }

    fn import(&mut self, node: Node) {
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let module = match name.kind() {
                "aliased_import" => name
                    .child_by_field_name("name")
                    .map(|n| self.text(n))
                    .unwrap_or_default(),
                _ => self.text(name),
            };
            self.record.imports.push(module);
        }
    }

    fn import_from(&mut self, node: Node) {
        let module = node
            .child_by_field_name("module_name")
            .map(|n| self.text(n))
            .unwrap_or_default();
        let join = |symbol: &str| {
            if module.ends_with('.') {
                format!("{module}{symbol}")
            } else {
                format!("{module}.{symbol}")
            }
        };
        let mut imported = Vec::new();
        let mut cursor = node.walk();
        for name in node.children_by_field_name("name", &mut cursor) {
            let symbol = match name.kind() {
                "aliased_import" => name
                    .child_by_field_name("name")
                    .map(|n| self.text(n))
                    .unwrap_or_default(),
                _ => self.text(name),
            };
            imported.push(join(&symbol));
        }
        let mut cursor = node.walk();
        if node
            .named_children(&mut cursor)
            .any(|child| child.kind() == "wildcard_import")
        {
            imported.push(join("*"));
        }
        self.record.imports.extend(imported);
    }

    fn class(&mut self, node: Node<'t>, outer: Node<'t>) {
        let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
            return;
        };
        let mut bases = Vec::new();
        if let Some(superclasses) = node.child_by_field_name("superclasses") {
            let mut cursor = superclasses.walk();
            for base in superclasses.named_children(&mut cursor) {
                if !matches!(
                    base.kind(),
                    "keyword_argument" | "comment" | "list_splat" | "dictionary_splat"
                ) {
                    bases.push(self.text(base));
                }
            }
        }
        let body = node.child_by_field_name("body");
        let doc = body
            .and_then(|b| docstring(b, self.src))
            .or_else(|| self.comment_above(outer.start_position().row));
        let index = self.record.classes.len();
        self.record.classes.push(ClassDecl {
            name: name.clone(),
            bases,
            methods: Vec::new(),
            doc,
            line: outer.start_position().row + 1,
        });
        let Some(body) = body else {
            return;
        };
        let first_function = self.record.functions.len();
        self.block(body, &Scope::Class(name.clone()));
        let methods = self.record.functions[first_function..]
            .iter()
            .filter(|f| f.owner.as_deref() == Some(name.as_str()))
            .map(|f| f.name.clone())
            .collect();
        self.record.classes[index].methods = methods;
    }

    fn function(&mut self, node: Node<'t>, outer: Node<'t>, scope: &Scope) {
        let Some(name) = node.child_by_field_name("name").map(|n| self.text(n)) else {
            return;
        };
        let (qualified_name, owner) = match scope {
            Scope::Module => (name.clone(), None),
            Scope::Class(class) => (format!("{class}.{name}"), Some(class.clone())),
            Scope::Function(parent) => (format!("{parent}.{name}"), None),
        };
        let params = node
            .child_by_field_name("parameters")
            .map(|p| self.parameters(p))
            .unwrap_or_default();
        let body = node.child_by_field_name("body");
        let doc = body
            .and_then(|b| docstring(b, self.src))
            .or_else(|| self.comment_above(outer.start_position().row));
        self.record.functions.push(FunctionDecl {
            name,
            qualified_name: qualified_name.clone(),
            owner,
            params,
            doc,
            start_line: outer.start_position().row + 1,
            end_line: node.end_position().row + 1,
        });
        if let Some(body) = body {
            self.bodies.push((qualified_name.clone(), body));
            self.block(body, &Scope::Function(qualified_name));
        }
    }

    fn parameters(&self, parameters: Node) -> Vec<String> {
        let mut params = Vec::new();
        let mut cursor = parameters.walk();
        for param in parameters.named_children(&mut cursor) {
            let name = match param.kind() {
                "identifier" => Some(param),
                "default_parameter" | "typed_default_parameter" => {
                    param.child_by_field_name("name")
                }
                "typed_parameter" => param.named_child(0).map(splat_name),
                "list_splat_pattern" | "dictionary_splat_pattern" => Some(splat_name(param)),
                _ => None,
            };
            if let Some(name) = name {
                params.push(self.text(name));
            }
        }
        params
    }

    /// The contiguous block of `#` comment lines directly above line `row` (0-based).
    fn comment_above(&self, row: usize) -> Option<String> {
        let mut collected = Vec::new();
        for line in self.lines[..row.min(self.lines.len())].iter().rev() {
            let Some(comment) = line.trim_start().strip_prefix('#') else {
                break;
            };
            collected.push(comment.trim());
        }
        if collected.is_empty() {
            return None;
        }
        collected.reverse();
        Some(collected.join("\n"))
    }
}

/// `*args` → `args`; other nodes are returned unchanged.
fn splat_name(node: Node) -> Node {
    match node.kind() {
        "list_splat_pattern" | "dictionary_splat_pattern" => node.named_child(0).unwrap_or(node),
        _ => node,
    }
}

/// The docstring of a module or block: a string literal as its first statement.
fn docstring(block: Node, src: &[u8]) -> Option<String> {
    let mut cursor = block.walk();
    let first = block
        .named_children(&mut cursor)
        .find(|n| n.kind() != "comment")?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let string = first.named_child(0)?;
    if string.kind() != "string" {
        return None;
    }
    let raw = string.utf8_text(src).ok()?;
    let doc = strip_string_quotes(raw).trim();
    (!doc.is_empty()).then(|| doc.to_string())
}

fn strip_string_quotes(raw: &str) -> &str {
    let unprefixed = raw.trim_start_matches(|c: char| "rRbBuUfF".contains(c));
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = unprefixed
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return inner;
        }
    }
    unprefixed
}

/// Adds to `called` the bare callee names in `node` that are in `known`. Nested function and
/// class definitions are not entered.
fn collect_calls(node: Node, src: &[u8], known: &BTreeSet<String>, called: &mut BTreeSet<String>) {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        match child.kind() {
            "function_definition" | "class_definition" => continue,
            "decorated_definition" => {
                // Decorator expressions run in the enclosing scope.
                let mut inner = child.walk();
                for decorator in child
                    .named_children(&mut inner)
                    .filter(|n| n.kind() == "decorator")
                {
                    collect_calls(decorator, src, known, called);
                }
                continue;
            }
            "call" => {
                if let Some(name) = child
                    .child_by_field_name("function")
                    .and_then(|target| callee_name(target, src))
                    && known.contains(name)
                {
                    called.insert(name.to_string());
                }
            }
            _ => {}
        }
        collect_calls(child, src, known, called);
    }
}

/// The last identifier of a call target: `f` for `f(...)`, `g` for `obj.g(...)`.
fn callee_name<'s>(target: Node, src: &'s [u8]) -> Option<&'s str> {
    match target.kind() {
        "identifier" => target.utf8_text(src).ok(),
        "attribute" => target
            .child_by_field_name("attribute")
            .and_then(|a| a.utf8_text(src).ok()),
        _ => None,
    }
}
