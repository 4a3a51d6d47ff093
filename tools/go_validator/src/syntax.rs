use crate::lexer::{GoLexer, SyntaxDiagnostic};
use serde::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyntaxResult {
    pub valid: bool,
    /// Name from the package clause, when there is one.
    pub package: Option<String>,
    pub diagnostics: Vec<SyntaxDiagnostic>,
}

impl SyntaxResult {
    pub(crate) fn add(&mut self, line: usize, message: String) {
        self.valid = false;
        self.diagnostics.push(SyntaxDiagnostic { line, message });
    }
}

/// Structural Go syntax check: a package clause comes first, delimiters are balanced outside
/// literals and comments, and every literal and comment is terminated. Needs no toolchain.
pub fn validate_syntax(content: &str) -> SyntaxResult {
    let mut result = SyntaxResult {
        valid: true,
        ..SyntaxResult::default()
    };
    if content.trim().is_empty() {
        result.add(1, "empty file".into());
        return result;
    }
    let mut lexer = GoLexer::new();
    lexer.push_str(content);
    result.package = lexer.package_name().map(str::to_string);
    if result.package.is_none() {
        result.add(1, "expected `package <name>` before any other declaration".into());
    }
    for diagnostic in lexer.finish() {
        result.add(diagnostic.line, diagnostic.message);
    }
    result
}
