//! Place to put utilities that are only used by tests.

use crate::inference::{ChunkStream, InferenceError, InferenceService, Prompt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Returns a new temporary directory. Unlike the defaults in the `tempdir` and `tempfile` crates,
/// this directory is not world-accessible by default.
#[cfg(not(miri))]
pub fn tempdir() -> std::io::Result<tempfile::TempDir> {
    use std::fs::Permissions;
    let mut builder = tempfile::Builder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(0o700));
    }
    builder.tempdir()
}

/// Response returned by a default [MockInference].
pub const MOCK_GO_RESPONSE: &str =
    "Here is the translation:\n```go\npackage common\n\nfunc Mock() int {\n\treturn 1\n}\n```\n";

type RespondFn = dyn Fn(&Prompt, usize) -> Result<String, InferenceError> + Send + Sync;
type ChunksFn = dyn Fn(&Prompt, usize) -> Result<Vec<String>, InferenceError> + Send + Sync;

/// An inference service that can be programmed to have many different behaviors, for testing code
/// that calls `InferenceService`'s methods.
///
/// # Example
/// ```
/// use modernize_core::test_util::MockInference;
/// let service = MockInference::new()
///     .respond(|_, _| Ok("```go\npackage x\n```".into()));
/// ```
pub struct MockInference {
    respond: Box<RespondFn>,
    chunks: Option<Box<ChunksFn>>,
    calls: AtomicUsize,
    chunks_consumed: Arc<AtomicUsize>,
}

impl Default for MockInference {
    fn default() -> Self {
        Self::new()
    }
}

impl MockInference {
    /// Creates a MockInference that answers every prompt with [MOCK_GO_RESPONSE].
    pub fn new() -> MockInference {
        MockInference {
            respond: Box::new(|_, _| Ok(MOCK_GO_RESPONSE.into())),
            chunks: None,
            calls: AtomicUsize::new(0),
            chunks_consumed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the closure answering `complete`. It receives the prompt and the zero-based index of
    /// this call.
    pub fn respond<F>(mut self, f: F) -> MockInference
    where
        F: Fn(&Prompt, usize) -> Result<String, InferenceError> + Send + Sync + 'static,
    {
        self.respond = Box::new(f);
        self
    }

    /// Enables streaming; `complete_streamed` yields the chunks returned by `f` one at a time.
    pub fn streamed_chunks<F>(mut self, f: F) -> MockInference
    where
        F: Fn(&Prompt, usize) -> Result<Vec<String>, InferenceError> + Send + Sync + 'static,
    {
        self.chunks = Some(Box::new(f));
        self
    }

    /// Number of requests made so far, streamed or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of streamed chunks pulled by the consumer so far.
    pub fn chunks_consumed(&self) -> usize {
        self.chunks_consumed.load(Ordering::SeqCst)
    }
}

impl InferenceService for MockInference {
    fn name(&self) -> &str {
        "mock_inference"
    }

    fn supports_streaming(&self) -> bool {
        self.chunks.is_some()
    }

    fn complete(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if cancel.is_cancelled() {
            return Err(InferenceError::Cancelled);
        }
        (self.respond)(prompt, call)
    }

    fn complete_streamed(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, InferenceError> {
        let Some(ref chunks) = self.chunks else {
            return Err(InferenceError::StreamingUnsupported);
        };
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let chunks = chunks(prompt, call)?;
        let consumed = self.chunks_consumed.clone();
        let cancel = cancel.clone();
        Ok(Box::new(chunks.into_iter().map(move |chunk| {
            if cancel.is_cancelled() {
                return Err(InferenceError::Cancelled);
            }
            consumed.fetch_add(1, Ordering::SeqCst);
            Ok(chunk)
        })))
    }
}
