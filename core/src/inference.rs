//! Interface to the external code-generating inference service.
//!
//! The pipeline only ever talks to an `InferenceService` trait object, so tests can substitute
//! [crate::test_util::MockInference] and the binary can plug in the `llm`-backed client.

use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A request to the inference service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InferenceError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("request cancelled")]
    Cancelled,
    #[error("inference service error: {0}")]
    Service(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("service does not support streaming")]
    StreamingUnsupported,
}

impl InferenceError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, InferenceError::Cancelled)
    }
}

/// Text chunks of a streamed response, in arrival order. Pulling the next chunk blocks until it
/// arrives; dropping the iterator abandons the rest of the response.
pub type ChunkStream = Box<dyn Iterator<Item = Result<String, InferenceError>> + Send>;

pub trait InferenceService: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether [InferenceService::complete_streamed] is available.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Sends `prompt` and waits for the full response text.
    fn complete(&self, prompt: &Prompt, cancel: &CancellationToken)
    -> Result<String, InferenceError>;

    /// Sends `prompt` and returns the response as a stream of chunks.
    fn complete_streamed(
        &self,
        _prompt: &Prompt,
        _cancel: &CancellationToken,
    ) -> Result<ChunkStream, InferenceError> {
        Err(InferenceError::StreamingUnsupported)
    }
}
