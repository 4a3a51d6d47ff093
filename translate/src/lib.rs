//! Incremental Python-to-Go translation. This is normally used through the `modernize` binary,
//! but is exposed as a library crate as well; [convert] is the single entry point.

pub mod cli;
mod report;

pub use report::{FileReport, FileStatus, REPORT_FILE_NAME, ReportSink, RunContext, RunReport};

use chrono::Utc;
use go_validator::{ModuleCheck, Validator};
use llm_translation::{ConversionUnit, Services, Translator, add_elapsed};
use modernize_core::CancellationToken;
use modernize_core::SourceFile;
use modernize_core::config::{Config, RunSettings, ToolConfigError};
use modernize_core::inference::InferenceService;
use organize_output::{Organizer, Placement};
use python_analyzer::AnalysisRecord;
use rayon::prelude::*;
use scan_source::ScanError;
use semantic_index::SemanticIndex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use structural_cache::StructuralCache;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that abort a run before any file is processed. Everything else is reported per file.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error(transparent)]
    Input(#[from] ScanError),
    #[error(transparent)]
    Config(#[from] ToolConfigError),
    #[error("failed to start the worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Typed configuration of every component, read from the `tools` table.
pub struct ToolConfigs {
    pub scan_source: scan_source::Config,
    pub structural_cache: structural_cache::Config,
    pub semantic_index: semantic_index::Config,
    pub prompt_context: prompt_context::Config,
    pub llm_translation: llm_translation::Config,
    pub organize_output: organize_output::Config,
    pub go_validator: go_validator::Config,
}

impl ToolConfigs {
    pub fn load(config: &Config) -> Result<ToolConfigs, ToolConfigError> {
        let tools = ToolConfigs {
            scan_source: config.tool_config("scan_source", scan_source::Config::FIELDS)?,
            structural_cache: config
                .tool_config("structural_cache", structural_cache::Config::FIELDS)?,
            semantic_index: config.tool_config("semantic_index", semantic_index::Config::FIELDS)?,
            prompt_context: config.tool_config("prompt_context", prompt_context::Config::FIELDS)?,
            llm_translation: config
                .tool_config("llm_translation", &llm_translation::Config::fields())?,
            organize_output: config
                .tool_config("organize_output", organize_output::Config::FIELDS)?,
            go_validator: config.tool_config("go_validator", go_validator::Config::FIELDS)?,
        };
        tools.scan_source.validate();
        tools.structural_cache.validate();
        tools.semantic_index.validate();
        tools.prompt_context.validate();
        tools.llm_translation.validate();
        tools.organize_output.validate();
        tools.go_validator.validate();
        Ok(tools)
    }
}

/// Translates the file or directory `config.input` into a Go module tree under `config.output`.
///
/// Fails only when the input does not exist, holds no Python files, or the configuration is
/// unusable. Per-file problems end up in the returned report, which is also written to
/// `<output>/run_report.json`.
pub fn convert(
    config: &Config,
    inference: Arc<dyn InferenceService>,
    cancel: &CancellationToken,
) -> Result<RunReport, ConvertError> {
    let tools = ToolConfigs::load(config)?;
    let services = open_services(config, &tools, inference);
    convert_with(config, &tools, services, cancel)
}

/// Opens the cache, the semantic index and the validator under the output's state directory.
/// Unreachable backends degrade to uncached and unindexed operation instead of failing.
pub fn open_services(
    config: &Config,
    tools: &ToolConfigs,
    inference: Arc<dyn InferenceService>,
) -> Services {
    let state_dir = config.state_dir();
    Services {
        inference,
        cache: Arc::new(
            StructuralCache::open(&tools.structural_cache, &state_dir).with_force(config.force),
        ),
        index: Arc::new(SemanticIndex::open(&tools.semantic_index, &state_dir)),
        validator: Arc::new(Validator::open(&tools.go_validator)),
    }
}

/// [convert] with the services supplied by the caller.
pub fn convert_with(
    config: &Config,
    tools: &ToolConfigs,
    services: Services,
    cancel: &CancellationToken,
) -> Result<RunReport, ConvertError> {
    let started_at = Utc::now();
    let scanned = scan_source::scan(&config.input, &tools.scan_source)?;
    info!(
        "Converting {} file(s) from {} with {} worker(s)",
        scanned.files.len(),
        config.input.display(),
        config.workers
    );

    let mut warnings = Vec::new();
    // Files deleted since the last run must not feed context into new prompts.
    let present: HashSet<&Path> = scanned.files.iter().map(SourceFile::path).collect();
    match services.index.prune(&present) {
        Ok(0) => {}
        Ok(removed) => info!("Dropped {removed} index record(s) of files no longer present"),
        Err(e) => warnings.push(format!("Failed to prune the semantic index: {e}")),
    }
    if tools.go_validator.use_toolchain && !services.validator.has_toolchain() {
        warnings.push(format!(
            "Go toolchain `{}` unavailable; compile, vet and test signals score 0",
            tools.go_validator.go_binary
        ));
    }

    let organizer = Organizer::new(&config.output, &tools.organize_output);
    let sources: Vec<&Path> = scanned
        .files
        .iter()
        .map(|f| relative_source(f.path(), &config.input))
        .collect();
    let placements = organizer.place(&sources);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()?;

    let sink = ReportSink::default();
    let translator = Translator::new(
        services.clone(),
        &tools.llm_translation,
        &tools.prompt_context,
        config.business_hints.clone(),
    );
    pool.install(|| {
        // Every file is analyzed and indexed before any is translated, so prompts can draw on the
        // whole tree.
        let analyzed: Vec<Analyzed> = scanned
            .files
            .par_iter()
            .zip(placements.into_par_iter())
            .map(|(file, placement)| {
                let started = Instant::now();
                let analysis = analyze(file, &services.cache, &services.index);
                let mut ms = 0;
                add_elapsed(&mut ms, started.elapsed());
                (file.clone(), placement, analysis, ms)
            })
            .collect();
        if let Err(e) = services.index.flush() {
            warn!("Failed to persist the semantic index: {e}");
        }
        analyzed
            .into_par_iter()
            .for_each(|(file, placement, analysis, analysis_ms)| {
                let unit = process(
                    file,
                    placement,
                    analysis,
                    analysis_ms,
                    &translator,
                    &organizer,
                    cancel,
                );
                sink.push(unit);
            });
    });

    let mut units = sink.into_units();
    let written: Vec<&ConversionUnit> = units.iter().filter(|u| u.target_path.is_some()).collect();
    if !written.is_empty() {
        if let Err(e) = organizer.ensure_go_mod() {
            warnings.push(format!("Failed to create go.mod: {e}"));
        }
    }
    let module_dirs: BTreeSet<String> = written.iter().map(|u| u.module.clone()).collect();
    let modules: BTreeMap<String, ModuleCheck> = if cancel.is_cancelled() {
        BTreeMap::new()
    } else {
        pool.install(|| {
            module_dirs
                .into_par_iter()
                .map(|module| {
                    let check = services.validator.check_module(&organizer.module_dir(&module));
                    (module, check)
                })
                .collect()
        })
    };
    for unit in units.iter_mut() {
        let Some(ref output) = unit.output else {
            continue;
        };
        if unit.target_path.is_none() {
            continue;
        }
        let module = modules.get(&unit.module).cloned().unwrap_or_default();
        let started = Instant::now();
        unit.assessment = Some(services.validator.assess(
            output,
            &unit.go_file_name,
            unit.analysis.as_ref(),
            &module,
            None,
        ));
        add_elapsed(&mut unit.timings.validation_ms, started.elapsed());
    }

    warnings.extend(services.cache.warnings());
    let report = RunReport::new(
        RunContext {
            started_at,
            settings: RunSettings::from(config),
            cancelled: cancel.is_cancelled(),
            warnings,
            skipped: scanned.skipped,
            modules,
            cache: services.cache.stats(),
            index: services.index.stats(),
        },
        &units,
    );
    match report.write(&config.output) {
        Ok(path) => info!("Wrote {}", path.display()),
        Err(e) => error!("Failed to write the run report: {e}"),
    }
    report.log_summary();
    Ok(report)
}

type Analyzed = (SourceFile, Placement, Result<AnalysisRecord, String>, u64);

/// `path` relative to the input root, or `path` itself when the input is a single file.
fn relative_source<'p>(path: &'p Path, input: &Path) -> &'p Path {
    match path.strip_prefix(input) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative,
        _ => path,
    }
}

/// Structural facts for `file`, from the cache when its digest is unchanged. Fresh analyses are
/// cached and indexed.
fn analyze(
    file: &SourceFile,
    cache: &StructuralCache,
    index: &SemanticIndex,
) -> Result<AnalysisRecord, String> {
    let path = file.path();
    if let Some(error) = file.syntax_error() {
        // Whatever the index learned from an earlier, parseable version is stale now.
        if let Err(e) = index.remove_file(path) {
            warn!("Failed to drop index records of {}: {e}", path.display());
        }
        return Err(format!("syntax error: {error}"));
    }
    if let Some(record) = cache.get_analysis(path, file.digest()) {
        debug!("Reusing cached analysis of {}", path.display());
        if index.file_meaning(path).is_none() {
            index_file(index, file, &record);
        }
        return Ok(record);
    }
    let record = match python_analyzer::analyze_bytes(file.bytes()) {
        Ok(record) => record,
        Err(e) => {
            if let Err(e) = index.remove_file(path) {
                warn!("Failed to drop index records of {}: {e}", path.display());
            }
            return Err(format!("syntax error: {e}"));
        }
    };
    cache.put_analysis(path, file.digest(), &record);
    index_file(index, file, &record);
    Ok(record)
}

fn index_file(index: &SemanticIndex, file: &SourceFile, record: &AnalysisRecord) {
    if let Err(e) = index.index_analysis(file.path(), &file.stem(), record) {
        warn!("Failed to index {}: {e}", file.path().display());
    }
}

/// Runs one file through translation and writing. Never fails; problems are recorded on the
/// returned unit.
fn process(
    file: SourceFile,
    placement: Placement,
    analysis: Result<AnalysisRecord, String>,
    analysis_ms: u64,
    translator: &Translator,
    organizer: &Organizer,
    cancel: &CancellationToken,
) -> ConversionUnit {
    let started = Instant::now();
    let (analysis, failure) = match analysis {
        Ok(record) => (Some(record), None),
        Err(e) => (None, Some(e)),
    };
    let mut unit = ConversionUnit::new(file, analysis, placement.module, placement.file_name);
    unit.timings.analysis_ms = analysis_ms;
    if let Some(failure) = failure {
        warn!("Skipping {}: {failure}", unit.source.path().display());
        unit.failure = Some(failure);
        unit.timings.total_ms = analysis_ms;
        return unit;
    }

    if translator.convert(&mut unit, cancel).is_ok() {
        write(&mut unit, organizer, cancel);
    }
    add_elapsed(&mut unit.timings.total_ms, started.elapsed());
    unit.timings.total_ms += analysis_ms;
    unit
}

fn write(unit: &mut ConversionUnit, organizer: &Organizer, cancel: &CancellationToken) {
    let Some(ref output) = unit.output else {
        return;
    };
    if cancel.is_cancelled() {
        unit.failure = Some("cancelled before the output was written".into());
        unit.cancelled_before_write = true;
        return;
    }
    let started = Instant::now();
    // Cache hits leave an identical file alone so its timestamp does not change.
    let written = if unit.cached {
        organizer
            .write_if_changed(&unit.module, &unit.go_file_name, output)
            .map(|(path, _)| path)
    } else {
        organizer.write(&unit.module, &unit.go_file_name, output)
    };
    add_elapsed(&mut unit.timings.write_ms, started.elapsed());
    match written {
        Ok(path) => unit.target_path = Some(path),
        Err(e) => {
            error!("{e}");
            unit.failure = Some(e.to_string());
        }
    }
}

#[cfg(test)]
mod tests;
