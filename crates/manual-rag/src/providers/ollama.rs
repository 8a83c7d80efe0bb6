//! Ollama-based providers for embeddings, LLM and vision
//!
//! Wraps `OllamaClient` to implement the provider traits.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::error::Result;
use crate::generation::OllamaClient;

use super::embedding::EmbeddingProvider;
use super::llm::{FragmentStream, LlmProvider};
use super::vision::VisionProvider;

/// Ollama embedding provider using nomic-embed-text or similar models
pub struct OllamaEmbedder {
    client: Arc<OllamaClient>,
    dimensions: usize,
}

impl OllamaEmbedder {
    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>, dimensions: usize) -> Self {
        Self { client, dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.client.embed(text).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Ollama LLM provider for streamed answer generation
pub struct OllamaLlm {
    client: Arc<OllamaClient>,
    model: String,
}

impl OllamaLlm {
    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>) -> Self {
        let model = client.generate_model().to_string();
        Self { client, model }
    }
}

#[async_trait]
impl LlmProvider for OllamaLlm {
    fn stream_completion(&self, prompt: String) -> FragmentStream {
        self.client.generate_stream(prompt)
    }

    async fn health_check(&self) -> Result<bool> {
        self.client.health_check().await
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Ollama vision provider for page images (llava or similar)
pub struct OllamaVision {
    client: Arc<OllamaClient>,
}

impl OllamaVision {
    /// Create from existing OllamaClient
    pub fn from_client(client: Arc<OllamaClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VisionProvider for OllamaVision {
    async fn describe_image(&self, image: &[u8]) -> Result<String> {
        self.client.describe_image(image).await
    }

    fn name(&self) -> &str {
        "ollama"
    }
}

/// Combined Ollama provider that shares a single client for embeddings, LLM and vision
pub struct OllamaProvider {
    embedder: OllamaEmbedder,
    llm: OllamaLlm,
    vision: OllamaVision,
}

impl OllamaProvider {
    /// Create a new combined Ollama provider
    pub fn new(config: &LlmConfig, dimensions: usize) -> Result<Self> {
        let client = Arc::new(OllamaClient::new(config)?);
        Ok(Self {
            embedder: OllamaEmbedder::from_client(Arc::clone(&client), dimensions),
            llm: OllamaLlm::from_client(Arc::clone(&client)),
            vision: OllamaVision::from_client(client),
        })
    }

    /// Split into separate providers
    pub fn split(self) -> (OllamaEmbedder, OllamaLlm, OllamaVision) {
        (self.embedder, self.llm, self.vision)
    }
}
