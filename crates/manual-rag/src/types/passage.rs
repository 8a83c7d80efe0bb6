//! Passage, candidate and context types flowing through the retrieval pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A page-level unit of retrievable content.
///
/// Produced once at ingestion time and immutable afterwards; queries never
/// create or modify records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageRecord {
    /// Unique record ID
    pub id: Uuid,
    /// Page text, possibly followed by visual-description annotations
    pub content: String,
    /// Originating document identifier (the uploaded filename)
    pub source_id: String,
    /// 1-based page number
    pub page_number: u32,
    /// When the record was ingested
    pub ingested_at: DateTime<Utc>,
}

impl PassageRecord {
    /// Create a new record for a page
    pub fn new(source_id: impl Into<String>, page_number: u32, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            source_id: source_id.into(),
            page_number,
            ingested_at: Utc::now(),
        }
    }

    /// Check the ingestion contract: non-empty content, source and a 1-based page
    pub fn is_valid(&self) -> bool {
        !self.content.trim().is_empty() && !self.source_id.is_empty() && self.page_number >= 1
    }

    /// Render as a context entry: `[Page n] content`
    pub fn format_for_context(&self) -> String {
        format!("[Page {}] {}", self.page_number, self.content)
    }
}

/// A passage with its query-specific relevance score
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    /// The candidate passage
    pub passage: PassageRecord,
    /// Higher is more relevant; only relative order matters
    pub relevance_score: f32,
    /// Position in the broad-retrieval order (0 = nearest)
    pub retrieval_rank: usize,
}

/// The grounding material handed to the generator.
///
/// Entries are `[Page n] content`, in final order, separated by a blank line.
#[derive(Debug, Clone, Default)]
pub struct AssembledContext {
    text: String,
    passages: Vec<PassageRecord>,
    reranked: bool,
}

impl AssembledContext {
    /// Separator between assembled passages
    pub const SEPARATOR: &'static str = "\n\n";

    /// Assemble passages in the order given
    pub fn assemble(passages: Vec<PassageRecord>, reranked: bool) -> Self {
        let text = passages
            .iter()
            .map(PassageRecord::format_for_context)
            .collect::<Vec<_>>()
            .join(Self::SEPARATOR);

        Self {
            text,
            passages,
            reranked,
        }
    }

    /// Context with no passages
    pub fn empty() -> Self {
        Self::default()
    }

    /// The assembled context text
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Selected passages in final order
    pub fn passages(&self) -> &[PassageRecord] {
        &self.passages
    }

    /// Page numbers of the selected passages, in final order
    pub fn pages(&self) -> Vec<u32> {
        self.passages.iter().map(|p| p.page_number).collect()
    }

    /// Whether the relevance scorer determined the order
    pub fn is_reranked(&self) -> bool {
        self.reranked
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }
}

impl fmt::Display for AssembledContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// One element of the lazily produced answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerFragment {
    /// Text produced by the generator (or the fixed not-found answer)
    Text(String),
    /// Terminal message describing a generation failure
    Diagnostic(String),
}

impl AnswerFragment {
    /// Fragment text as sent to the caller
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(text) | Self::Diagnostic(text) => text,
        }
    }

    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Self::Diagnostic(_))
    }

    pub fn into_string(self) -> String {
        match self {
            Self::Text(text) | Self::Diagnostic(text) => text,
        }
    }
}
