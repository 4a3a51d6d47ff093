//! Discovers the Python files to translate and checks that each one parses.

use modernize_core::SourceFile;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Extension of the files the scanner picks up.
pub const SOURCE_EXTENSION: &str = "py";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Files larger than this are skipped.
    pub max_file_size_bytes: u64,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_file_size_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    pub const FIELDS: &[&str] = &["max_file_size_bytes"];

    /// Returns a mock config for testing.
    pub fn mock() -> Config {
        Config::default()
    }

    pub fn validate(&self) {
        if self.max_file_size_bytes == 0 {
            warn!("tools.scan_source.max_file_size_bytes is 0; every file will be skipped");
        }
    }
}

/// Fatal scanning errors. Anything else is reported per file.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("input path {0} does not exist")]
    InputNotFound(PathBuf),
    #[error("no Python files found under {0}")]
    NoFiles(PathBuf),
}

/// A discovered file that will not be translated.
#[derive(Clone, Debug, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    /// Every readable file, sorted by path. Files that fail to parse carry their syntax error.
    pub files: Vec<SourceFile>,
    /// Files that could not be read or were too large.
    pub skipped: Vec<SkippedFile>,
}

impl ScanResult {
    pub fn parse_failures(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter().filter(|f| !f.parse_valid())
    }
}

/// Scans `input`, which may be a single `.py` file or a directory tree.
pub fn scan(input: &Path, config: &Config) -> Result<ScanResult, ScanError> {
    if !input.exists() {
        return Err(ScanError::InputNotFound(input.to_path_buf()));
    }
    let candidates = if input.is_file() {
        if has_source_extension(input) {
            vec![input.to_path_buf()]
        } else {
            vec![]
        }
    } else {
        discover(input)
    };
    if candidates.is_empty() {
        return Err(ScanError::NoFiles(input.to_path_buf()));
    }

    let mut result = ScanResult::default();
    for path in candidates {
        match inspect(&path, config) {
            Ok(file) => result.files.push(file),
            Err(reason) => {
                warn!("Skipping {}: {reason}", path.display());
                result.skipped.push(SkippedFile { path, reason });
            }
        }
    }
    info!(
        "Discovered {} Python files ({} skipped, {} unparseable)",
        result.files.len(),
        result.skipped.len(),
        result.parse_failures().count()
    );
    Ok(result)
}

/// Returns the `.py` files under `root`, sorted, ignoring hidden directories and `__pycache__`.
fn discover(root: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_source_extension(e.path()))
        .map(DirEntry::into_path)
        .collect();
    paths.sort();
    paths
}

fn is_ignored_dir(entry: &DirEntry) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name == "__pycache__" || name.starts_with('.')
}

fn has_source_extension(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(SOURCE_EXTENSION)
}

/// Reads one file and checks its size and syntax. An `Err` is the reason to skip it.
fn inspect(path: &Path, config: &Config) -> Result<SourceFile, String> {
    let size = fs::metadata(path).map_err(|e| e.to_string())?.len();
    if size > config.max_file_size_bytes {
        return Err(format!(
            "file is {size} bytes, above the {} byte limit",
            config.max_file_size_bytes
        ));
    }
    let file = SourceFile::read(path).map_err(|e| e.to_string())?;
    match python_analyzer::analyze_bytes(file.bytes()) {
        Ok(_) => {
            debug!("{} parses ({} lines)", path.display(), file.line_count());
            Ok(file)
        }
        Err(error) => {
            warn!("{} does not parse: {error}", path.display());
            Ok(file.with_syntax_error(error.to_string()))
        }
    }
}
