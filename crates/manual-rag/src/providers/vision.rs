//! Vision provider trait for describing page images

use async_trait::async_trait;

use crate::error::Result;

/// Trait for multimodal models that turn an image into searchable text
///
/// Implementations:
/// - `OllamaVision`: Local Ollama server (`/api/generate` with `images`)
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Describe one encoded image. Each call stands alone, so a failure
    /// affects only that image.
    async fn describe_image(&self, image: &[u8]) -> Result<String>;

    /// Get provider name for logging
    fn name(&self) -> &str;
}
