//! Configuration for the question-answering service
//!
//! Values come from [`Default`], then an optional TOML file, then environment
//! variables. [`RagConfig::load`] applies all three and validates the result.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Main service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Ollama/LLM configuration
    pub llm: LlmConfig,
    /// Embedding configuration
    pub embeddings: EmbeddingConfig,
    /// Two-stage retrieval widths
    pub retrieval: RetrievalConfig,
    /// Reranker selection
    pub reranker: RerankerConfig,
    /// Similarity index storage
    pub vector_db: VectorDbConfig,
    /// Document conversion and page extraction
    pub ingestion: IngestionConfig,
}

impl RagConfig {
    /// Load configuration from an optional TOML file plus environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                toml::from_str::<RagConfig>(&raw)
                    .map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?
            }
            None => RagConfig::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup (the process environment in production)
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("RAG_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("RAG_PORT") {
            self.server.port = parse_var("RAG_PORT", &port)?;
        }
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(key) = lookup("RAG_LLM_API_KEY") {
            self.llm.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Some(model) = lookup("RAG_GENERATE_MODEL") {
            self.llm.generate_model = model;
        }
        if let Some(model) = lookup("RAG_EMBED_MODEL") {
            self.llm.embed_model = model;
        }
        if let Some(model) = lookup("RAG_VISION_MODEL") {
            self.llm.vision_model = model;
        }
        if let Some(path) = lookup("RAG_INDEX_PATH") {
            self.vector_db.storage_path = PathBuf::from(path);
        }
        if let Some(k) = lookup("RAG_K_BROAD") {
            self.retrieval.k_broad = parse_var("RAG_K_BROAD", &k)?;
        }
        if let Some(n) = lookup("RAG_N_FINAL") {
            self.retrieval.n_final = parse_var("RAG_N_FINAL", &n)?;
        }
        if let Some(kind) = lookup("RAG_RERANKER") {
            self.reranker.kind = parse_var("RAG_RERANKER", &kind)?;
        }
        if let Some(binary) = lookup("RAG_LIBREOFFICE") {
            self.ingestion.libreoffice_binary = binary;
        }
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        self.retrieval.validate()
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::Config(format!("{} has invalid value '{}': {}", name, value, e)))
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Enable CORS
    pub enable_cors: bool,
    /// Maximum upload size in bytes (default: 100MB)
    pub max_upload_size: usize,
    /// Directory for temporary upload files
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            enable_cors: true,
            max_upload_size: 100 * 1024 * 1024, // 100MB
            upload_dir: std::env::temp_dir().join("manual-rag-uploads"),
        }
    }
}

/// LLM (Ollama) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,
    /// Optional bearer credential for hosted backends
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Embedding model name
    pub embed_model: String,
    /// Generation model name
    pub generate_model: String,
    /// Multimodal model that describes page images
    pub vision_model: String,
    /// Temperature for generation
    pub temperature: f32,
    /// Request timeout in seconds; for streamed answers, the longest gap between chunks
    pub timeout_secs: u64,
    /// Number of retries for failed embedding requests
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            embed_model: "nomic-embed-text".to_string(),
            generate_model: "llama3.2:3b".to_string(),
            vision_model: "llava".to_string(),
            temperature: 0.0,
            timeout_secs: 120,
            max_retries: 2,
        }
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding dimensions (768 for nomic-embed-text)
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self { dimensions: 768 }
    }
}

/// Broad-retrieval and final-context widths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates pulled from the similarity index
    pub k_broad: usize,
    /// Passages kept for the assembled context
    pub n_final: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k_broad: 25,
            n_final: 4,
        }
    }
}

impl RetrievalConfig {
    /// Reject widths the coordinator cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.n_final == 0 {
            return Err(Error::Config("retrieval.n_final must be at least 1".to_string()));
        }
        if self.k_broad < self.n_final {
            return Err(Error::Config(format!(
                "retrieval.k_broad ({}) must be >= retrieval.n_final ({})",
                self.k_broad, self.n_final
            )));
        }
        if self.k_broad < self.n_final.saturating_mul(5) {
            tracing::warn!(
                "retrieval.k_broad ({}) is less than 5x n_final ({}); reranking has little to choose from",
                self.k_broad,
                self.n_final
            );
        }
        Ok(())
    }
}

/// Which relevance scorer backs the reranking stage
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RerankerKind {
    /// ONNX cross-encoder (ms-marco MiniLM)
    #[default]
    CrossEncoder,
    /// BM25-style term scoring, no model required
    Lexical,
    /// Skip reranking and keep broad-retrieval order
    None,
}

impl FromStr for RerankerKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cross-encoder" | "cross_encoder" | "crossencoder" => Ok(Self::CrossEncoder),
            "lexical" | "bm25" => Ok(Self::Lexical),
            "none" | "off" => Ok(Self::None),
            other => Err(format!("unknown reranker '{}'", other)),
        }
    }
}

/// Reranker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    /// Scorer implementation
    pub kind: RerankerKind,
    /// HuggingFace repository of the cross-encoder
    pub model: String,
    /// Maximum (query, passage) token length
    pub max_length: usize,
    /// Cache directory for model files
    pub cache_dir: PathBuf,
    /// Fall back to lexical scoring if the cross-encoder cannot be loaded
    pub lexical_fallback: bool,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            kind: RerankerKind::default(),
            model: "cross-encoder/ms-marco-MiniLM-L-6-v2".to_string(),
            max_length: 512,
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("manual-rag")
                .join("reranker"),
            lexical_fallback: true,
        }
    }
}

/// Similarity index storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    /// Storage path for the persisted index
    pub storage_path: PathBuf,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        let storage_path = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("manual-rag")
            .join("index.json");

        Self { storage_path }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// LibreOffice executable used for DOCX to PDF conversion
    pub libreoffice_binary: String,
    /// Conversion timeout in seconds
    pub conversion_timeout_secs: u64,
    /// Index DOCX text as a single page when conversion is unavailable
    pub docx_text_fallback: bool,
    /// Describe embedded page images with the vision model
    pub describe_images: bool,
    /// Images described per page; the rest are ignored
    pub max_images_per_page: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            libreoffice_binary: "soffice".to_string(),
            conversion_timeout_secs: 120,
            docx_text_fallback: true,
            describe_images: true,
            max_images_per_page: 8,
        }
    }
}
