//! Validation of generated Go code and the confidence score that decides how much review a
//! translation needs.
//!
//! The built-in syntax check always runs. Compilation, `go vet` and `go test` need a Go toolchain;
//! when none is available those signals are reported as not run and score 0.

mod confidence;
mod lexer;
pub mod naming;
mod rules;
mod syntax;
mod toolchain;

pub use confidence::{Confidence, ReviewLevel, Signals, Thresholds, Weights};
pub use lexer::{GoLexer, SyntaxDiagnostic};
pub use rules::{
    KeyedAmounts, Mergeable, business_rule_coverage, lint_score, merge_similar,
    unfinished_markers,
};
pub use syntax::{SyntaxResult, validate_syntax};
pub use toolchain::{CompileResult, FormatCheck, GoCli, GoToolchain, TestResult};

use python_analyzer::AnalysisRecord;
use serde::{Deserialize, Serialize};
use std::io::Write as _;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("no Go toolchain is available")]
    NoToolchain,
    #[error("failed to run {program}: {source}")]
    Command {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Look for `go` and `gofmt` and use them when found.
    pub use_toolchain: bool,
    pub go_binary: String,
    pub gofmt_binary: String,
    /// Run `go test` in every module directory.
    pub run_tests: bool,
    pub weights: Weights,
    pub thresholds: Thresholds,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            use_toolchain: true,
            go_binary: "go".into(),
            gofmt_binary: "gofmt".into(),
            run_tests: false,
            weights: Weights::default(),
            thresholds: Thresholds::default(),
        }
    }
}

impl Config {
    pub const FIELDS: &[&str] = &[
        "use_toolchain",
        "go_binary",
        "gofmt_binary",
        "run_tests",
        "weights",
        "thresholds",
    ];

    /// Returns a mock config for testing.
    pub fn mock() -> Config {
        Config {
            use_toolchain: false,
            ..Config::default()
        }
    }

    pub fn validate(&self) {
        self.weights.validate();
        self.thresholds.validate();
    }
}

/// Toolchain results for one module directory, shared by every file in it. `None` means the check
/// did not run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ModuleCheck {
    pub compile: Option<CompileResult>,
    pub vet: Option<Vec<String>>,
    pub tests: Option<TestResult>,
}

impl ModuleCheck {
    /// Vet diagnostics that point into `file_name`.
    pub fn vet_diagnostics_for(&self, file_name: &str) -> Option<usize> {
        let stem = file_name.trim_end_matches(".go");
        self.vet.as_ref().map(|lines| {
            lines
                .iter()
                .filter(|line| {
                    line.split_once(".go:")
                        .and_then(|(path, _)| path.rsplit(['/', '\\']).next())
                        .is_some_and(|name| name == stem)
                })
                .count()
        })
    }
}

/// Signals and confidence for one translated file.
#[derive(Clone, Debug, Serialize)]
pub struct Assessment {
    pub signals: Signals,
    pub confidence: Confidence,
}

pub struct Validator {
    toolchain: Option<Box<dyn GoToolchain>>,
    run_tests: bool,
    weights: Weights,
    thresholds: Thresholds,
}

impl Validator {
    pub fn new(config: &Config, toolchain: Option<Box<dyn GoToolchain>>) -> Validator {
        Validator {
            toolchain,
            run_tests: config.run_tests,
            weights: config.weights,
            thresholds: config.thresholds,
        }
    }

    /// Builds a validator, detecting the Go toolchain when the config asks for it.
    pub fn open(config: &Config) -> Validator {
        let toolchain = if config.use_toolchain {
            let found = GoCli::detect(&config.go_binary, &config.gofmt_binary);
            if found.is_none() {
                warn!(
                    "Go toolchain `{}` not found; compile, vet and test signals will score 0",
                    config.go_binary
                );
            }
            found.map(|cli| Box::new(cli) as Box<dyn GoToolchain>)
        } else {
            None
        };
        Validator::new(config, toolchain)
    }

    pub fn has_toolchain(&self) -> bool {
        self.toolchain.is_some()
    }

    /// Built-in syntax check, plus `gofmt` diagnostics when a toolchain is available.
    pub fn validate_syntax(&self, content: &str) -> SyntaxResult {
        let mut result = validate_syntax(content);
        if let Some(ref toolchain) = self.toolchain {
            match format_check_content(toolchain.as_ref(), content) {
                Ok(check) => {
                    for error in check.errors {
                        result.add(line_of(&error), error);
                    }
                    if check.unformatted {
                        debug!("Translation is not gofmt-formatted");
                    }
                }
                Err(e) => warn!("gofmt check failed: {e}"),
            }
        }
        result
    }

    pub fn validate_compilation(&self, module_dir: &Path) -> Result<CompileResult, ValidateError> {
        let toolchain = self.toolchain.as_ref().ok_or(ValidateError::NoToolchain)?;
        let result = toolchain.compile(module_dir)?;
        info!(
            "Compiled {}: {}",
            module_dir.display(),
            if result.success { "ok" } else { "failed" }
        );
        Ok(result)
    }

    /// Runs every toolchain check on one module directory. Failures to run a check are logged and
    /// leave that check unset.
    pub fn check_module(&self, module_dir: &Path) -> ModuleCheck {
        let Some(ref toolchain) = self.toolchain else {
            return ModuleCheck::default();
        };
        let log = |check: &str, e: ValidateError| {
            warn!("go {check} in {} failed to run: {e}", module_dir.display())
        };
        let compile = self
            .validate_compilation(module_dir)
            .map_err(|e| log("build", e))
            .ok();
        let vet = toolchain
            .vet(module_dir)
            .map_err(|e| log("vet", e))
            .ok();
        let tests = if self.run_tests {
            toolchain.test(module_dir).map_err(|e| log("test", e)).ok()
        } else {
            None
        };
        ModuleCheck { compile, vet, tests }
    }

    /// Scores one translated file. `analysis` is absent for files that never parsed;
    /// `integration_tests` is a pass rate supplied by the caller, if it ran any.
    pub fn assess(
        &self,
        go_source: &str,
        file_name: &str,
        analysis: Option<&AnalysisRecord>,
        module: &ModuleCheck,
        integration_tests: Option<f64>,
    ) -> Assessment {
        let vet_count = module.vet_diagnostics_for(file_name).unwrap_or(0);
        let signals = Signals {
            syntax_valid: Some(validate_syntax(go_source).valid),
            compiles: module.compile.as_ref().map(|c| c.success),
            unit_tests: module.tests.and_then(|t| t.pass_rate()),
            integration_tests,
            business_rules: analysis.map(|a| business_rule_coverage(a, go_source)),
            lint: Some(lint_score(vet_count, go_source)),
        };
        Assessment {
            signals,
            confidence: self.confidence(&signals),
        }
    }

    pub fn confidence(&self, signals: &Signals) -> Confidence {
        let score = self.weights.score(signals);
        Confidence {
            score,
            review: self.thresholds.review_level(score),
        }
    }
}

/// `gofmt` works on files, so the content goes through a temporary `.go` file.
fn format_check_content(
    toolchain: &dyn GoToolchain,
    content: &str,
) -> Result<FormatCheck, ValidateError> {
    let mut file = tempfile::Builder::new().suffix(".go").tempfile()?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    toolchain.format_check(file.path())
}

/// Line number from a `path:line:col: message` diagnostic, or 1.
fn line_of(diagnostic: &str) -> usize {
    diagnostic
        .split_once(".go:")
        .and_then(|(_, rest)| rest.split(':').next())
        .and_then(|line| line.parse().ok())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests;
