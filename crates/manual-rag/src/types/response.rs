//! Response types for the HTTP layer

use serde::{Deserialize, Serialize};

/// A `[Page X]` citation that was found in the answer and backed by the context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCitation {
    /// Cited page number
    pub page_number: u32,
    /// Source document of the cited page
    pub source_id: String,
}

/// Non-streaming answer with citations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Full answer text
    pub answer: String,
    /// Citations that match pages in the assembled context
    pub citations: Vec<PageCitation>,
    /// Pages selected for the context, in final order
    pub pages: Vec<u32>,
    /// Whether the relevance scorer ordered the context
    pub reranked: bool,
    /// Whether generation ended with a diagnostic
    pub degraded: bool,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
}

/// Result of a document upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// "success" when at least one page was indexed
    pub status: String,
    /// Name of the file that was indexed (the PDF after conversion)
    pub filename: String,
    /// Name of the uploaded file
    pub original_name: String,
    /// Number of pages inserted into the index
    pub pages_indexed: usize,
    /// Pages that were skipped (empty or failed to embed)
    pub pages_skipped: usize,
}
