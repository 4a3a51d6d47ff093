//! Go toolchain wrapper

use crate::ValidateError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, trace};

/// Result of `gofmt` on one file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FormatCheck {
    /// Syntax errors reported by the formatter.
    pub errors: Vec<String>,
    /// The file parses but is not in canonical format.
    pub unformatted: bool,
}

/// Result of compiling one package directory.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompileResult {
    pub success: bool,
    pub diagnostics: Vec<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub passed: usize,
    pub failed: usize,
}

impl TestResult {
    /// Fraction of tests that passed, or `None` when there were no tests.
    pub fn pass_rate(&self) -> Option<f64> {
        let total = self.passed + self.failed;
        (total > 0).then(|| self.passed as f64 / total as f64)
    }
}

pub trait GoToolchain: Send + Sync {
    fn name(&self) -> &str;

    fn format_check(&self, path: &Path) -> Result<FormatCheck, ValidateError>;

    fn compile(&self, dir: &Path) -> Result<CompileResult, ValidateError>;

    /// `go vet` diagnostics for the package in `dir`.
    fn vet(&self, dir: &Path) -> Result<Vec<String>, ValidateError>;

    fn test(&self, dir: &Path) -> Result<TestResult, ValidateError>;
}

/// Shells out to the installed `go` and `gofmt` binaries.
pub struct GoCli {
    go: PathBuf,
    gofmt: PathBuf,
}

impl GoCli {
    pub fn new(go: impl Into<PathBuf>, gofmt: impl Into<PathBuf>) -> GoCli {
        GoCli {
            go: go.into(),
            gofmt: gofmt.into(),
        }
    }

    /// Returns the toolchain if `go version` runs successfully.
    pub fn detect(go: impl Into<PathBuf>, gofmt: impl Into<PathBuf>) -> Option<GoCli> {
        let cli = GoCli::new(go, gofmt);
        match Command::new(&cli.go).arg("version").output() {
            Ok(output) if output.status.success() => {
                debug!("Found {}", String::from_utf8_lossy(&output.stdout).trim());
                Some(cli)
            }
            _ => None,
        }
    }

    fn run(&self, program: &Path, args: &[&str], dir: Option<&Path>) -> Result<Output, ValidateError> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        let output = command.output().map_err(|source| ValidateError::Command {
            program: program.display().to_string(),
            source,
        })?;
        trace!(
            "{} {}:\n{}{}",
            program.display(),
            args.join(" "),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        Ok(output)
    }
}

/// Lines of compiler output that point at a source position, e.g. `./tax.go:4:2: undefined: x`.
fn diagnostic_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.contains(".go:"))
        .map(str::to_string)
        .collect()
}

impl GoToolchain for GoCli {
    fn name(&self) -> &str {
        "go"
    }

    fn format_check(&self, path: &Path) -> Result<FormatCheck, ValidateError> {
        let path = path.to_string_lossy();
        let output = self.run(&self.gofmt, &["-l", "-e", &*path], None)?;
        Ok(FormatCheck {
            errors: diagnostic_lines(&String::from_utf8_lossy(&output.stderr)),
            unformatted: !output.stdout.is_empty(),
        })
    }

    fn compile(&self, dir: &Path) -> Result<CompileResult, ValidateError> {
        let null = if cfg!(windows) { "NUL" } else { "/dev/null" };
        let output = self.run(&self.go, &["build", "-o", null, "."], Some(dir))?;
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics = diagnostic_lines(&stderr);
        if !output.status.success() && diagnostics.is_empty() {
            diagnostics.push(stderr.trim().to_string());
        }
        Ok(CompileResult {
            success: output.status.success(),
            diagnostics,
        })
    }

    fn vet(&self, dir: &Path) -> Result<Vec<String>, ValidateError> {
        let output = self.run(&self.go, &["vet", "."], Some(dir))?;
        Ok(diagnostic_lines(&String::from_utf8_lossy(&output.stderr)))
    }

    fn test(&self, dir: &Path) -> Result<TestResult, ValidateError> {
        let output = self.run(&self.go, &["test", "-v", "."], Some(dir))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let count = |marker: &str| {
            stdout
                .lines()
                .filter(|line| line.trim_start().starts_with(marker))
                .count()
        };
        Ok(TestResult {
            passed: count("--- PASS"),
            failed: count("--- FAIL"),
        })
    }
}
