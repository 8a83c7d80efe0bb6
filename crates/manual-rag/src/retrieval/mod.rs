//! Retrieval: broad similarity search, reranking and context assembly

mod coordinator;

pub use coordinator::{score_candidates, RetrievalCoordinator};
