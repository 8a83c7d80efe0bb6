//! LLM provider trait for streaming text completion

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// Lazily produced completion fragments. Any item may be an error.
pub type FragmentStream = BoxStream<'static, Result<String>>;

/// Trait for prompt-in, token-stream-out generation backends
///
/// Implementations:
/// - `OllamaLlm`: Local Ollama server (`/api/generate` with `stream: true`)
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Start a completion for `prompt`.
    ///
    /// Must be lazy: no request is issued until the stream is first polled, and
    /// dropping the stream abandons the request.
    fn stream_completion(&self, prompt: String) -> FragmentStream;

    /// Check if the provider is healthy and available
    async fn health_check(&self) -> Result<bool>;

    /// Get provider name for logging
    fn name(&self) -> &str;

    /// Get the model being used
    fn model(&self) -> &str;
}
