//! Application state for the question-answering server
//!
//! Services are built once, in dependency order, and shared by every
//! request: configuration, Ollama client, similarity index, relevance
//! scorer, generation backend, then the retrieval coordinator.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::config::{RagConfig, RerankerConfig, RerankerKind};
use crate::error::Result;
use crate::generation::AnswerGenerator;
use crate::ingestion::IngestPipeline;
use crate::pipeline::AnswerPipeline;
use crate::providers::{
    ollama::OllamaProvider, CrossEncoderScorer, LexicalScorer, LlmProvider, LocalSimilarityIndex,
    RelevanceScorer, SimilarityIndex, VisionProvider,
};
use crate::retrieval::RetrievalCoordinator;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: RagConfig,
    index: Arc<dyn SimilarityIndex>,
    llm: Arc<dyn LlmProvider>,
    pipeline: AnswerPipeline,
    ingest: IngestPipeline,
    ready: RwLock<bool>,
}

impl AppState {
    /// Build all services from configuration
    pub async fn new(config: RagConfig) -> Result<Self> {
        tracing::info!("Initializing application state...");

        let (embedder, llm, vision) =
            OllamaProvider::new(&config.llm, config.embeddings.dimensions)?.split();
        tracing::info!(
            "Ollama provider initialized (embed: {}, generate: {}, vision: {})",
            config.llm.embed_model,
            config.llm.generate_model,
            config.llm.vision_model
        );
        let vision: Option<Arc<dyn VisionProvider>> = if config.ingestion.describe_images {
            Some(Arc::new(vision))
        } else {
            tracing::info!("Image descriptions disabled");
            None
        };

        let index = LocalSimilarityIndex::open(&config.vector_db.storage_path, Arc::new(embedder))?;
        tracing::info!(
            "Similarity index opened at {:?}",
            config.vector_db.storage_path
        );

        let scorer = build_scorer(&config.reranker).await;

        Self::from_parts(config, Arc::new(index), scorer, Arc::new(llm), vision)
    }

    /// Assemble state from already-initialized services
    pub fn from_parts(
        config: RagConfig,
        index: Arc<dyn SimilarityIndex>,
        scorer: Option<Arc<dyn RelevanceScorer>>,
        llm: Arc<dyn LlmProvider>,
        vision: Option<Arc<dyn VisionProvider>>,
    ) -> Result<Self> {
        let coordinator = RetrievalCoordinator::new(Arc::clone(&index), scorer, &config.retrieval)?;
        tracing::info!(
            "Retrieval coordinator ready (k_broad: {}, n_final: {}, scorer: {})",
            coordinator.k_broad(),
            coordinator.n_final(),
            coordinator.scorer_name()
        );

        let generator = AnswerGenerator::new(Arc::clone(&llm));
        let pipeline = AnswerPipeline::new(Arc::new(coordinator), Arc::new(generator));
        let ingest = IngestPipeline::new(Arc::clone(&index), vision, &config);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                index,
                llm,
                pipeline,
                ingest,
                ready: RwLock::new(true),
            }),
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    pub fn index(&self) -> &Arc<dyn SimilarityIndex> {
        &self.inner.index
    }

    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.inner.llm
    }

    pub fn pipeline(&self) -> &AnswerPipeline {
        &self.inner.pipeline
    }

    pub fn ingest(&self) -> &IngestPipeline {
        &self.inner.ingest
    }

    /// Check if the service is ready
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.read()
    }

    /// Set ready state
    pub fn set_ready(&self, ready: bool) {
        *self.inner.ready.write() = ready;
    }
}

/// Load the configured relevance scorer; `None` means broad order only
async fn build_scorer(config: &RerankerConfig) -> Option<Arc<dyn RelevanceScorer>> {
    match config.kind {
        RerankerKind::None => {
            tracing::info!("Reranking disabled");
            None
        }
        RerankerKind::Lexical => Some(Arc::new(LexicalScorer::new())),
        RerankerKind::CrossEncoder => match CrossEncoderScorer::new(config).await {
            Ok(scorer) => {
                tracing::info!("Cross-encoder loaded: {}", scorer.model());
                Some(Arc::new(scorer))
            }
            Err(e) if config.lexical_fallback => {
                tracing::warn!("Cross-encoder unavailable, using lexical scorer: {}", e);
                Some(Arc::new(LexicalScorer::new()))
            }
            Err(e) => {
                tracing::warn!("Cross-encoder unavailable, reranking disabled: {}", e);
                None
            }
        },
    }
}
