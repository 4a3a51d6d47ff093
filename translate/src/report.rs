//! Collects per-file outcomes from the workers and turns them into the run report.

use chrono::{DateTime, Utc};
use go_validator::{Assessment, ModuleCheck, ReviewLevel};
use llm_translation::{ConversionUnit, PhaseTimings, UnitState};
use modernize_core::config::RunSettings;
use scan_source::SkippedFile;
use semantic_index::IndexStats;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use structural_cache::CacheStats;
use tracing::{info, warn};

/// Name of the machine-readable report written into the output directory.
pub const REPORT_FILE_NAME: &str = "run_report.json";

/// Append-only collection point shared by all workers.
#[derive(Default)]
pub struct ReportSink {
    units: Mutex<Vec<ConversionUnit>>,
}

impl ReportSink {
    pub fn push(&self, unit: ConversionUnit) {
        match self.units.lock() {
            Ok(mut units) => units.push(unit),
            Err(poisoned) => poisoned.into_inner().push(unit),
        }
    }

    /// Everything pushed so far, sorted by source path.
    pub fn into_units(self) -> Vec<ConversionUnit> {
        let mut units = self
            .units
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        units.sort_by(|a, b| a.source.path().cmp(b.source.path()));
        units
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Fresh translation that passed validation.
    Translated,
    Cached,
    /// Skeleton written after inference kept failing.
    Fallback,
    ParseFailed,
    Cancelled,
    /// Output could not be written.
    Failed,
}

/// Outcome for one input file.
#[derive(Clone, Debug, Serialize)]
pub struct FileReport {
    pub source_path: PathBuf,
    pub target_path: Option<PathBuf>,
    pub module: String,
    pub status: FileStatus,
    pub cached: bool,
    pub attempts: u32,
    pub duration_ms: u64,
    pub timings: PhaseTimings,
    pub states: Vec<UnitState>,
    pub validation: Option<Assessment>,
    pub failure: Option<String>,
    /// Why earlier inference attempts were rejected.
    pub attempt_failures: Vec<String>,
}

impl FileReport {
    pub fn from_unit(unit: &ConversionUnit) -> FileReport {
        let status = if unit.analysis.is_none() && unit.state() == UnitState::Pending {
            FileStatus::ParseFailed
        } else if unit.state() == UnitState::Cancelled || unit.cancelled_before_write {
            FileStatus::Cancelled
        } else if unit.target_path.is_none() {
            FileStatus::Failed
        } else if unit.cached {
            FileStatus::Cached
        } else if unit.fallback {
            FileStatus::Fallback
        } else {
            FileStatus::Translated
        };
        FileReport {
            source_path: unit.source.path().to_path_buf(),
            target_path: unit.target_path.clone(),
            module: unit.module.clone(),
            status,
            cached: unit.cached,
            attempts: unit.attempts,
            duration_ms: unit.timings.total_ms,
            timings: unit.timings,
            states: unit.trace().to_vec(),
            validation: unit.assessment.clone(),
            failure: unit.failure.clone(),
            attempt_failures: unit.failures.clone(),
        }
    }

    pub fn review(&self) -> Option<ReviewLevel> {
        self.validation.as_ref().map(|a| a.confidence.review)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub settings: RunSettings,
    pub cancelled: bool,
    pub files_total: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub translated: usize,
    pub fallbacks: usize,
    pub failed: usize,
    pub total_duration_ms: u64,
    pub average_file_ms: u64,
    /// Run-level problems, such as an unreachable cache.
    pub warnings: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    pub modules: BTreeMap<String, ModuleCheck>,
    pub cache: CacheStats,
    pub index: IndexStats,
    pub files: Vec<FileReport>,
}

/// Run-wide facts that do not come from individual files.
pub struct RunContext {
    pub started_at: DateTime<Utc>,
    pub settings: RunSettings,
    pub cancelled: bool,
    pub warnings: Vec<String>,
    pub skipped: Vec<SkippedFile>,
    pub modules: BTreeMap<String, ModuleCheck>,
    pub cache: CacheStats,
    pub index: IndexStats,
}

impl RunReport {
    pub fn new(context: RunContext, units: &[ConversionUnit]) -> RunReport {
        let files: Vec<FileReport> = units.iter().map(FileReport::from_unit).collect();
        let count = |status: FileStatus| files.iter().filter(|f| f.status == status).count();
        let saw = |state: UnitState| {
            files
                .iter()
                .filter(|f| f.states.contains(&state))
                .count()
        };
        let finished_at = Utc::now();
        let total_duration_ms = u64::try_from(
            (finished_at - context.started_at)
                .num_milliseconds()
                .max(0),
        )
        .unwrap_or(0);
        let file_ms: u64 = files.iter().map(|f| f.duration_ms).sum();
        let average_file_ms = match files.len() {
            0 => 0,
            n => file_ms / n as u64,
        };
        RunReport {
            started_at: context.started_at,
            finished_at,
            settings: context.settings,
            cancelled: context.cancelled,
            files_total: files.len() + context.skipped.len(),
            cache_hits: saw(UnitState::CacheHit),
            cache_misses: saw(UnitState::CacheMiss),
            translated: count(FileStatus::Translated),
            fallbacks: count(FileStatus::Fallback),
            failed: count(FileStatus::ParseFailed) + count(FileStatus::Failed),
            total_duration_ms,
            average_file_ms,
            warnings: context.warnings,
            skipped: context.skipped,
            modules: context.modules,
            cache: context.cache,
            index: context.index,
            files,
        }
    }

    /// The entry for `source_path`, if that file was part of the run.
    pub fn file(&self, source_path: &Path) -> Option<&FileReport> {
        self.files.iter().find(|f| f.source_path == source_path)
    }

    /// Writes the report as pretty-printed JSON into `dir`.
    pub fn write(&self, dir: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(REPORT_FILE_NAME);
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn log_summary(&self) {
        info!(
            "{} file(s): {} cache hit(s), {} miss(es), {} translated, {} fallback(s), {} failed, {} skipped",
            self.files_total,
            self.cache_hits,
            self.cache_misses,
            self.translated,
            self.fallbacks,
            self.failed,
            self.skipped.len()
        );
        info!(
            "Total {} ms, {} ms per file on average",
            self.total_duration_ms, self.average_file_ms
        );
        for file in &self.files {
            if let Some(ref failure) = file.failure {
                warn!("{}: {failure}", file.source_path.display());
            } else if let Some(ref validation) = file.validation {
                info!(
                    "{}: confidence {:.2} ({:?})",
                    file.source_path.display(),
                    validation.confidence.score,
                    validation.confidence.review
                );
            }
        }
        for warning in &self.warnings {
            warn!("{warning}");
        }
        if self.cancelled {
            warn!("The run was cancelled; unfinished files have no output");
        }
    }
}
