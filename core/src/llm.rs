//! Synchronous [InferenceService] implementation on top of the `llm` crate.
//!
//! Workers run on plain threads, so every request builds a small current-thread tokio runtime,
//! races the request against the run's cancellation token and wraps it in a wall-clock timeout.

use crate::inference::{ChunkStream, InferenceError, InferenceService, Prompt};
use futures::StreamExt as _;
use futures::stream::BoxStream;
use llm::LLMProvider;
use llm::builder::{LLMBackend, LLMBuilder};
use llm::chat::ChatMessage;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Environment variable consulted when no API key is configured.
pub const API_KEY_ENV: &str = "MODERNIZE_API_KEY";

/// API Key wrapper that hides the key in debug output.
#[derive(Clone, Deserialize)]
pub struct ApiKey(pub String);

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("********")
    }
}

/// Configuration for LLM clients.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LLMConfig {
    /// Hostname and port at which to find the LLM server. Example: "http://[::1]:11434"
    pub address: Option<String>,

    /// API Key for the LLM service. Falls back to `MODERNIZE_API_KEY`.
    pub api_key: Option<ApiKey>,

    /// Which backend to use, e.g. "ollama".
    pub backend: String,

    /// Name of the model to invoke.
    pub model: String,

    /// Maximum output tokens.
    pub max_tokens: u32,

    /// Upper bound on the wall-clock time of one request.
    pub timeout_secs: u64,

    /// Request streamed responses when the backend supports them.
    pub stream: bool,
}

impl Default for LLMConfig {
    fn default() -> LLMConfig {
        LLMConfig {
            address: None,
            api_key: None,
            backend: "ollama".into(),
            model: "qwen2.5-coder:7b".into(),
            max_tokens: 4096,
            timeout_secs: 180,
            stream: true,
        }
    }
}

impl LLMConfig {
    pub const FIELDS: &[&str] = &[
        "address",
        "api_key",
        "backend",
        "model",
        "max_tokens",
        "timeout_secs",
        "stream",
    ];

    /// Returns a mock config for testing.
    pub fn mock() -> LLMConfig {
        LLMConfig {
            backend: "mock_llm".into(),
            model: "mock_model".into(),
            max_tokens: 4000,
            ..LLMConfig::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn api_key(&self) -> Option<String> {
        match self.api_key {
            Some(ref key) if !key.0.is_empty() => Some(key.0.clone()),
            _ => std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()),
        }
    }
}

/// Inference client backed by the `llm` crate.
pub struct ModernizeLLM {
    config: LLMConfig,
    backend: LLMBackend,
}

impl ModernizeLLM {
    /// Validates the configuration. No connection is made until the first request.
    pub fn build(config: LLMConfig) -> Result<Self, InferenceError> {
        let backend = LLMBackend::from_str(&config.backend)
            .map_err(|e| InferenceError::Service(format!("unknown LLM backend: {e}")))?;
        Ok(Self { config, backend })
    }

    fn client(&self, system: &str) -> Result<Box<dyn LLMProvider>, InferenceError> {
        let mut llm_builder = LLMBuilder::new()
            .backend(self.backend.clone())
            .model(&self.config.model)
            .max_tokens(self.config.max_tokens)
            .temperature(0.0)
            .system(system);

        if let Some(ref address) = self.config.address
            && !address.is_empty()
        {
            llm_builder = llm_builder.base_url(address);
        }
        if let Some(api_key) = self.config.api_key() {
            llm_builder = llm_builder.api_key(api_key);
        }

        llm_builder
            .build()
            .map_err(|e| InferenceError::Service(e.to_string()))
    }

    fn messages(prompt: &Prompt) -> Vec<ChatMessage> {
        vec![ChatMessage::user().content(&prompt.user).build()]
    }
}

fn runtime() -> Result<Runtime, InferenceError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .enable_time()
        .build()
        .map_err(|e| InferenceError::Service(format!("failed to start tokio runtime: {e}")))
}

impl InferenceService for ModernizeLLM {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn supports_streaming(&self) -> bool {
        self.config.stream
    }

    fn complete(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError> {
        let client = self.client(&prompt.system)?;
        let messages = Self::messages(prompt);
        let timeout = self.config.timeout();
        runtime()?.block_on(async {
            tokio::select! {
                _ = cancel.cancelled() => Err(InferenceError::Cancelled),
                result = tokio::time::timeout(timeout, client.chat(&messages)) => {
                    let response = result
                        .map_err(|_| InferenceError::Timeout(timeout))?
                        .map_err(|e| InferenceError::Service(e.to_string()))?;
                    response
                        .text()
                        .ok_or_else(|| InferenceError::Malformed("no response text".into()))
                }
            }
        })
    }

    fn complete_streamed(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, InferenceError> {
        let client = self.client(&prompt.system)?;
        let messages = Self::messages(prompt);
        let timeout = self.config.timeout();
        let runtime = runtime()?;
        let deadline = Instant::now() + timeout;
        let stream: BoxStream<'static, Result<String, InferenceError>> =
            runtime.block_on(async {
                tokio::select! {
                    _ = cancel.cancelled() => Err(InferenceError::Cancelled),
                    opened = tokio::time::timeout_at(deadline, client.chat_stream(&messages)) => {
                        let stream = opened
                            .map_err(|_| InferenceError::Timeout(timeout))?
                            .map_err(|e| InferenceError::Service(e.to_string()))?;
                        Ok(stream
                            .map(|chunk| chunk.map_err(|e| InferenceError::Service(e.to_string())))
                            .boxed())
                    }
                }
            })?;
        Ok(Box::new(LlmChunks {
            runtime,
            stream,
            deadline,
            timeout,
            cancel: cancel.clone(),
            finished: false,
        }))
    }
}

/// Blocking iterator over a streamed response.
struct LlmChunks {
    runtime: Runtime,
    stream: BoxStream<'static, Result<String, InferenceError>>,
    deadline: Instant,
    timeout: Duration,
    cancel: CancellationToken,
    finished: bool,
}

impl Iterator for LlmChunks {
    type Item = Result<String, InferenceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let (stream, cancel) = (&mut self.stream, &self.cancel);
        let (deadline, timeout) = (self.deadline, self.timeout);
        let next = self.runtime.block_on(async {
            tokio::select! {
                _ = cancel.cancelled() => Some(Err(InferenceError::Cancelled)),
                next = tokio::time::timeout_at(deadline, stream.next()) => match next {
                    Ok(chunk) => chunk,
                    Err(_) => Some(Err(InferenceError::Timeout(timeout))),
                },
            }
        });
        if !matches!(next, Some(Ok(_))) {
            self.finished = true;
        }
        next
    }
}
