//! Provider abstractions for embeddings, generation, vision, similarity search and reranking
//!
//! The pipeline depends only on these traits; concrete services are built once
//! at startup and injected into the coordinator.

pub mod cross_encoder;
pub mod embedding;
pub mod llm;
pub mod local;
pub mod ollama;
pub mod reranker;
pub mod vector_store;
pub mod vision;

pub use cross_encoder::CrossEncoderScorer;
pub use embedding::EmbeddingProvider;
pub use llm::{FragmentStream, LlmProvider};
pub use local::LocalSimilarityIndex;
pub use reranker::{LexicalScorer, RelevanceScorer};
pub use vector_store::SimilarityIndex;
pub use vision::VisionProvider;
