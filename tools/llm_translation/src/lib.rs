//! Drives one Python file at a time through cache lookup, prompt building, inference, extraction
//! and validation, falling back to a generated skeleton when inference keeps failing.
//!
//! Workers call [Translator::convert] concurrently; every service it uses is shared and
//! thread-safe. A cache entry is only written for output that passed validation.

mod extract;
mod skeleton;
mod unit;

pub use extract::{EarlyStop, Extraction, ResponseShape, extract, extract_code, with_package};
pub use skeleton::skeleton;
pub use unit::{ConversionUnit, PhaseTimings, UnitState, add_elapsed};

use chrono::Utc;
use go_validator::Validator;
use modernize_core::CancellationToken;
use modernize_core::inference::{InferenceError, InferenceService, Prompt};
use modernize_core::llm::LLMConfig;
use prompt_context::ContextBuilder;
use semantic_index::SemanticIndex;
use semantic_index::meaning::file_meaning;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use structural_cache::{StructuralCache, TranslationMetadata};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(flatten)]
    pub llm: LLMConfig,

    /// Extra requests after the first one fails or returns invalid code.
    pub max_retries: u32,

    /// Stop reading a streamed response once a top-level block closes.
    pub early_stop: bool,

    /// Streamed chunks that must arrive before an early stop is allowed. The service's chunks stand
    /// in for tokens.
    pub min_stream_tokens: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            llm: LLMConfig::default(),
            max_retries: 2,
            early_stop: true,
            min_stream_tokens: 400,
        }
    }
}

impl Config {
    const OWN_FIELDS: &[&str] = &["max_retries", "early_stop", "min_stream_tokens"];

    /// Keys accepted in `tools.llm_translation`.
    pub fn fields() -> Vec<&'static str> {
        LLMConfig::FIELDS
            .iter()
            .chain(Config::OWN_FIELDS)
            .copied()
            .collect()
    }

    /// Returns a mock config for testing.
    pub fn mock() -> Config {
        Config {
            llm: LLMConfig::mock(),
            min_stream_tokens: 4,
            ..Config::default()
        }
    }

    pub fn validate(&self) {
        if self.max_retries > 10 {
            warn!(
                "tools.llm_translation.max_retries is {}; every failing file will be requested that many extra times",
                self.max_retries
            );
        }
        if self.llm.model.is_empty() {
            warn!("tools.llm_translation.model is empty");
        }
    }

    fn early_stop(&self) -> EarlyStop {
        EarlyStop {
            enabled: self.early_stop,
            min_chunks: self.min_stream_tokens,
        }
    }
}

/// The run was cancelled while this file was in flight. Nothing was written for it.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("conversion cancelled")]
pub struct Cancelled;

/// Shared services a [Translator] works with.
#[derive(Clone)]
pub struct Services {
    pub inference: Arc<dyn InferenceService>,
    pub cache: Arc<StructuralCache>,
    pub index: Arc<SemanticIndex>,
    pub validator: Arc<Validator>,
}

pub struct Translator {
    services: Services,
    context: ContextBuilder,
    top_k: usize,
    hints: Vec<String>,
    max_retries: u32,
    early_stop: EarlyStop,
}

impl Translator {
    pub fn new(
        services: Services,
        config: &Config,
        context: &prompt_context::Config,
        hints: Vec<String>,
    ) -> Translator {
        Translator {
            services,
            context: ContextBuilder::new(context),
            top_k: context.top_k,
            hints,
            max_retries: config.max_retries,
            early_stop: config.early_stop(),
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Runs `unit` to `Done`, leaving the Go code in `unit.output`. Returns `Err(Cancelled)`,
    /// with the unit in `Cancelled`, if `cancel` fires before the file is finished.
    pub fn convert(
        &self,
        unit: &mut ConversionUnit,
        cancel: &CancellationToken,
    ) -> Result<(), Cancelled> {
        let cancelled = |unit: &mut ConversionUnit| {
            unit.failure = Some(Cancelled.to_string());
            unit.transition(UnitState::Cancelled);
            Err(Cancelled)
        };
        if cancel.is_cancelled() {
            return cancelled(unit);
        }

        unit.transition(UnitState::CacheCheck);
        let (path, digest) = (unit.source.path().to_path_buf(), unit.source.digest().clone());
        if let Some(hit) = self.services.cache.get_translation(&path, &digest) {
            debug!("Cache hit for {}", path.display());
            // The package rules may have changed since the translation was cached.
            unit.output = Some(with_package(&hit.output, &unit.module));
            unit.cached = true;
            unit.transition(UnitState::CacheHit);
            unit.transition(UnitState::Done);
            return Ok(());
        }
        unit.transition(UnitState::CacheMiss);

        unit.transition(UnitState::ContextBuild);
        let started = Instant::now();
        let prompt = self.prompt(unit);
        add_elapsed(&mut unit.timings.context_ms, started.elapsed());

        for attempt in 1..=self.max_retries + 1 {
            if cancel.is_cancelled() {
                return cancelled(unit);
            }
            unit.attempts = attempt;
            unit.transition(UnitState::RequestSent);
            let started = Instant::now();
            let response = self.request(&prompt, unit, cancel);
            add_elapsed(&mut unit.timings.inference_ms, started.elapsed());

            match response {
                Err(e) if !e.is_retryable() => return cancelled(unit),
                Err(e) => {
                    warn!("{}: attempt {attempt} failed: {e}", path.display());
                    unit.failures.push(format!("attempt {attempt}: {e}"));
                }
                Ok(code) => {
                    let code = with_package(&code, &unit.module);
                    let started = Instant::now();
                    let syntax = self.services.validator.validate_syntax(&code);
                    add_elapsed(&mut unit.timings.validation_ms, started.elapsed());
                    if syntax.valid {
                        unit.transition(UnitState::Valid);
                        self.services.cache.put_translation(
                            &path,
                            &digest,
                            &code,
                            TranslationMetadata {
                                module: unit.module.clone(),
                                go_file: unit.go_file_name.clone(),
                                service: self.services.inference.name().to_string(),
                                attempts: attempt,
                                translated_at: Utc::now(),
                            },
                        );
                        info!("Translated {} in {attempt} attempt(s)", path.display());
                        unit.output = Some(code);
                        unit.transition(UnitState::Done);
                        return Ok(());
                    }
                    unit.transition(UnitState::Invalid);
                    let reason = syntax
                        .diagnostics
                        .first()
                        .map(|d| format!("line {}: {}", d.line, d.message))
                        .unwrap_or_else(|| "invalid Go".into());
                    warn!("{}: attempt {attempt} produced invalid Go: {reason}", path.display());
                    unit.failures.push(format!("attempt {attempt}: {reason}"));
                }
            }
            if attempt <= self.max_retries {
                unit.transition(UnitState::Retry);
            }
        }

        unit.transition(UnitState::TemplateFallback);
        warn!(
            "{}: giving up after {} attempt(s); writing a skeleton",
            path.display(),
            unit.attempts
        );
        let analysis = unit.analysis.clone().unwrap_or_default();
        unit.output = Some(skeleton(&unit.module, &unit.source.file_name(), &analysis));
        unit.fallback = true;
        unit.transition(UnitState::Done);
        Ok(())
    }

    fn prompt(&self, unit: &ConversionUnit) -> Prompt {
        let analysis = unit.analysis.clone().unwrap_or_default();
        let path = unit.source.path();
        let query = self
            .services
            .index
            .file_meaning(path)
            .unwrap_or_else(|| file_meaning(&unit.source.stem(), &analysis));
        let matches = self.services.index.related(path, &query, self.top_k);
        self.context
            .build(&unit.source, &analysis, &matches, &self.hints, &unit.module)
            .into()
    }

    /// Sends one request and extracts the code from the response.
    fn request(
        &self,
        prompt: &Prompt,
        unit: &mut ConversionUnit,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError> {
        let inference = &self.services.inference;
        let shape = if inference.supports_streaming() {
            match inference.complete_streamed(prompt, cancel) {
                Ok(chunks) => ResponseShape::Streamed(chunks),
                Err(InferenceError::StreamingUnsupported) => {
                    ResponseShape::Complete(inference.complete(prompt, cancel)?)
                }
                Err(e) => return Err(e),
            }
        } else {
            ResponseShape::Complete(inference.complete(prompt, cancel)?)
        };
        unit.transition(match shape {
            ResponseShape::Streamed(_) => UnitState::Streaming,
            ResponseShape::Complete(_) => UnitState::Complete,
        });
        let extraction = extract(shape, self.early_stop)?;
        unit.transition(UnitState::Extracted);
        Ok(extraction.code)
    }
}
