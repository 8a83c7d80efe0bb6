//! Core types for the question-answering pipeline

pub mod passage;
pub mod query;
pub mod response;

pub use passage::{AnswerFragment, AssembledContext, PassageRecord, ScoredCandidate};
pub use query::ChatRequest;
pub use response::{PageCitation, QueryResponse, UploadResponse};
