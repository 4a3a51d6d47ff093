//! Per-file conversion state.

use go_validator::Assessment;
use modernize_core::SourceFile;
use python_analyzer::AnalysisRecord;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Lifecycle of one file through the conversion state machine.
///
/// ```text
/// PENDING → CACHE_CHECK → CACHE_HIT → DONE
///                       → CACHE_MISS → CONTEXT_BUILD → REQUEST_SENT → STREAMING | COMPLETE
///                           → EXTRACTED → VALID → DONE
///                                       → INVALID → RETRY → REQUEST_SENT ...
///                                                 → TEMPLATE_FALLBACK → DONE
/// ```
///
/// A failed request goes to `RETRY` or `TEMPLATE_FALLBACK` directly. `CANCELLED` is reachable from
/// every state that waits on the inference service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitState {
    Pending,
    CacheCheck,
    CacheHit,
    CacheMiss,
    ContextBuild,
    RequestSent,
    Streaming,
    Complete,
    Extracted,
    Valid,
    Invalid,
    Retry,
    TemplateFallback,
    Done,
    Cancelled,
}

impl UnitState {
    /// Whether the state machine may move from `self` to `next`.
    pub fn allows(self, next: UnitState) -> bool {
        use UnitState::*;
        match (self, next) {
            (Done | Cancelled, _) => false,
            (Pending | CacheCheck | CacheMiss | ContextBuild | RequestSent | Streaming | Retry, Cancelled) => {
                true
            }
            (Pending, CacheCheck) => true,
            (CacheCheck, CacheHit | CacheMiss) => true,
            (CacheHit, Done) => true,
            (CacheMiss, ContextBuild) => true,
            (ContextBuild, RequestSent) => true,
            (RequestSent, Streaming | Complete | Retry | TemplateFallback) => true,
            (Streaming, Extracted | Retry | TemplateFallback) => true,
            (Complete, Extracted) => true,
            (Extracted, Valid | Invalid) => true,
            (Valid, Done) => true,
            (Invalid, Retry | TemplateFallback) => true,
            (Retry, RequestSent) => true,
            (TemplateFallback, Done) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Done | UnitState::Cancelled)
    }
}

/// Wall-clock time spent in each phase, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub analysis_ms: u64,
    pub context_ms: u64,
    pub inference_ms: u64,
    pub validation_ms: u64,
    pub write_ms: u64,
    /// From the start of analysis to the end of the write.
    pub total_ms: u64,
}

/// Adds `elapsed` to a phase counter.
pub fn add_elapsed(counter: &mut u64, elapsed: Duration) {
    *counter += u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
}

/// One Python file on its way to a Go file.
#[derive(Debug)]
pub struct ConversionUnit {
    pub source: SourceFile,
    /// Absent when the file did not parse.
    pub analysis: Option<AnalysisRecord>,
    /// Go package the output belongs to.
    pub module: String,
    pub go_file_name: String,
    pub target_path: Option<PathBuf>,
    pub output: Option<String>,
    /// The output came from the cache.
    pub cached: bool,
    /// Inference requests made for this file.
    pub attempts: u32,
    /// The output is a skeleton generated without inference.
    pub fallback: bool,
    /// Reasons earlier attempts were rejected.
    pub failures: Vec<String>,
    /// Why the file ended without usable output, if it did.
    pub failure: Option<String>,
    /// The run was cancelled after the output was ready but before it was written.
    pub cancelled_before_write: bool,
    pub assessment: Option<Assessment>,
    pub timings: PhaseTimings,
    trace: Vec<UnitState>,
}

impl ConversionUnit {
    pub fn new(
        source: SourceFile,
        analysis: Option<AnalysisRecord>,
        module: impl Into<String>,
        go_file_name: impl Into<String>,
    ) -> ConversionUnit {
        ConversionUnit {
            source,
            analysis,
            module: module.into(),
            go_file_name: go_file_name.into(),
            target_path: None,
            output: None,
            cached: false,
            attempts: 0,
            fallback: false,
            failures: vec![],
            failure: None,
            cancelled_before_write: false,
            assessment: None,
            timings: PhaseTimings::default(),
            trace: vec![UnitState::Pending],
        }
    }

    pub fn state(&self) -> UnitState {
        self.trace.last().copied().unwrap_or(UnitState::Pending)
    }

    /// Every state the unit has been in, starting with `Pending`.
    pub fn trace(&self) -> &[UnitState] {
        &self.trace
    }

    pub fn transition(&mut self, next: UnitState) {
        let current = self.state();
        if !current.allows(next) {
            warn!(
                "{}: unexpected transition {current:?} -> {next:?}",
                self.source.path().display()
            );
        }
        info!("{}: {next:?}", self.source.path().display());
        self.trace.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use UnitState::*;

    #[test]
    fn transitions() {
        let path = [
            Pending,
            CacheCheck,
            CacheMiss,
            ContextBuild,
            RequestSent,
            Streaming,
            Extracted,
            Invalid,
            Retry,
            RequestSent,
            Complete,
            Extracted,
            Valid,
            Done,
        ];
        assert!(path.windows(2).all(|w| w[0].allows(w[1])));
        assert!(CacheCheck.allows(CacheHit) && CacheHit.allows(Done));
        assert!(!CacheHit.allows(RequestSent));
        assert!(!Complete.allows(Cancelled));
        assert!(!Done.allows(Pending));
        assert!(Invalid.allows(TemplateFallback) && TemplateFallback.allows(Done));
        assert!(Done.is_terminal() && Cancelled.is_terminal() && !Valid.is_terminal());
    }

    #[test]
    fn unit_records_its_trace() {
        let source = SourceFile::from_bytes("a.py".into(), b"x = 1\n".to_vec());
        let mut unit = ConversionUnit::new(source, None, "common", "a.go");
        unit.transition(CacheCheck);
        unit.transition(CacheHit);
        unit.transition(Done);
        assert_eq!(unit.trace(), [Pending, CacheCheck, CacheHit, Done]);
        assert_eq!(unit.state(), Done);
    }
}
