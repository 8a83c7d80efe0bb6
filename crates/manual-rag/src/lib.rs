//! manual-rag: question answering over technical manuals with page citations
//!
//! Manuals are ingested page by page into a similarity index. A question runs
//! through two-stage retrieval (broad similarity search, then cross-encoder
//! reranking), the best pages are assembled into a `[Page n]`-annotated
//! context, and a grounded answer is streamed back with `[Page X]` citations
//! or the literal `Data Not Found.`.

pub mod config;
pub mod error;
pub mod generation;
pub mod ingestion;
pub mod pipeline;
pub mod providers;
pub mod retrieval;
pub mod server;
pub mod types;

pub use config::RagConfig;
pub use error::{Error, Result};
pub use generation::{AnswerGenerator, AnswerStream};
pub use pipeline::AnswerPipeline;
pub use retrieval::RetrievalCoordinator;
pub use types::{AnswerFragment, AssembledContext, PassageRecord, QueryResponse};
