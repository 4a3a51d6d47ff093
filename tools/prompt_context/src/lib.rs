//! Builds the bounded prompt for translating one Python file to Go.
//!
//! The prompt combines the file's structural facts, the closest semantic-index matches from other
//! files, and caller-supplied business hints. Other files only ever contribute their one-line
//! meaning; the only source text in the prompt is the file being translated.

use modernize_core::SourceFile;
use modernize_core::inference::Prompt;
use python_analyzer::AnalysisRecord;
use semantic_index::{SemanticMatch, SubjectType};
use semantic_index::meaning::detect_domain;
use serde::Deserialize;
use std::fmt::Write as _;
use tracing::{debug, warn};

/// System prompt. `{package}` is replaced with the target Go package name.
const SYSTEM_PROMPT: &str = include_str!("prompts/system_prompt.txt");

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of semantic matches included in a prompt.
    pub top_k: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config { top_k: 5 }
    }
}

impl Config {
    pub const FIELDS: &[&str] = &["top_k"];

    /// Returns a mock config for testing.
    pub fn mock() -> Config {
        Config { top_k: 3 }
    }

    pub fn validate(&self) {
        if self.top_k == 0 {
            warn!("tools.prompt_context.top_k is 0; prompts will carry no related context");
        }
    }
}

/// The two halves of an inference request for one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptContext {
    pub system: String,
    pub user: String,
}

impl From<PromptContext> for Prompt {
    fn from(context: PromptContext) -> Prompt {
        Prompt {
            system: context.system,
            user: context.user,
        }
    }
}

pub struct ContextBuilder {
    top_k: usize,
}

impl ContextBuilder {
    pub fn new(config: &Config) -> ContextBuilder {
        ContextBuilder { top_k: config.top_k }
    }

    /// Builds the prompt for translating `file` into Go package `package`. The output depends only
    /// on the arguments; `matches` beyond the configured top-k are dropped.
    pub fn build(
        &self,
        file: &SourceFile,
        analysis: &AnalysisRecord,
        matches: &[SemanticMatch],
        hints: &[String],
        package: &str,
    ) -> PromptContext {
        let file_name = file.file_name();
        let mut user = String::new();
        // Writing to a String cannot fail.
        let _ = writeln!(user, "File: {file_name}");
        let _ = writeln!(user, "Domain: {}", detect_domain(&file.stem(), analysis));

        section(&mut user, "Business hints", hints.iter().map(|h| h.trim().to_string()));
        section(&mut user, "Dependencies", analysis.imports.iter().cloned());
        section(
            &mut user,
            "Classes",
            analysis.classes.iter().map(|class| {
                let mut line = class.name.clone();
                if !class.bases.is_empty() {
                    let _ = write!(line, "({})", class.bases.join(", "));
                }
                if !class.methods.is_empty() {
                    let _ = write!(line, ": methods {}", class.methods.join(", "));
                }
                line
            }),
        );
        section(
            &mut user,
            "Functions",
            analysis.functions.iter().map(|function| {
                let mut line = format!("{}({})", function.qualified_name, function.params.join(", "));
                if let Some(doc) = function.doc.as_deref().and_then(|d| d.lines().next()) {
                    let _ = write!(line, " - {}", doc.trim());
                }
                line
            }),
        );
        let used = matches.len().min(self.top_k);
        section(
            &mut user,
            "Related context",
            matches[..used].iter().map(|m| {
                format!(
                    "[{:.3}] {} {}: {}",
                    m.score,
                    subject_label(m),
                    m.source_path.display(),
                    m.meaning
                )
            }),
        );

        let source = String::from_utf8_lossy(file.bytes());
        let fence = fence_for(&source);
        let _ = writeln!(user, "\nSource ({file_name}):");
        let _ = writeln!(user, "{fence}python");
        user.push_str(&source);
        if !source.ends_with('\n') {
            user.push('\n');
        }
        let _ = writeln!(user, "{fence}");

        debug!(
            "Prompt for {} carries {used} related matches ({} bytes)",
            file.path().display(),
            user.len()
        );
        PromptContext {
            system: SYSTEM_PROMPT.replace("{package}", package),
            user,
        }
    }
}

fn subject_label(m: &SemanticMatch) -> String {
    let subject = match m.subject {
        SubjectType::File => "file",
        SubjectType::Function => "function",
        SubjectType::Relation => "relation",
    };
    match m.name {
        Some(ref name) => format!("{subject} {name} in"),
        None => subject.to_string(),
    }
}

/// Appends a titled bullet list. Empty lists are left out entirely.
fn section(out: &mut String, title: &str, items: impl Iterator<Item = String>) {
    let mut items = items.peekable();
    if items.peek().is_none() {
        return;
    }
    let _ = writeln!(out, "\n{title}:");
    for item in items {
        let _ = writeln!(out, "- {item}");
    }
}

/// A backtick fence longer than any backtick run inside `source`.
fn fence_for(source: &str) -> String {
    let longest = source
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat((longest + 1).max(3))
}
