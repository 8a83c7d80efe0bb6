//! Relevance scorer trait and the model-free lexical scorer

use std::collections::{HashMap, HashSet};

use crate::error::Result;

/// Pairwise (query, passage) relevance scoring.
///
/// Scores are deterministic for fixed weights and have no side effects. Only
/// their relative order within one query is meaningful. Failures are returned
/// as `Err` so the caller can choose a fallback path.
///
/// Implementations:
/// - `CrossEncoderScorer`: ONNX ms-marco cross-encoder
/// - `LexicalScorer`: BM25-style term saturation, no model
pub trait RelevanceScorer: Send + Sync {
    /// Score a single (query, passage) pair
    fn score(&self, query: &str, passage: &str) -> Result<f32>;

    /// Score every passage against one query, in input order.
    ///
    /// Default implementation calls `score` per pair.
    fn score_batch(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        passages.iter().map(|p| self.score(query, p)).collect()
    }

    /// Get scorer name for logging
    fn name(&self) -> &str;
}

/// BM25 term-frequency saturation parameter
const K1: f32 = 1.2;
/// BM25 length normalisation parameter
const B: f32 = 0.75;
/// Reference passage length in tokens; a manual page runs a few hundred words
const REFERENCE_LENGTH: f32 = 250.0;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "i",
    "in", "is", "it", "of", "on", "or", "the", "to", "what", "when", "where", "which", "who",
    "why", "with",
];

/// Model-free scorer based on BM25 term saturation.
///
/// Each distinct query term contributes its saturated term frequency in the
/// passage; the sum is weighted by the fraction of query terms covered. Uses
/// a fixed reference length so the score of a pair does not depend on which
/// other passages share the batch.
#[derive(Debug, Default, Clone)]
pub struct LexicalScorer;

impl LexicalScorer {
    pub fn new() -> Self {
        Self
    }
}

/// Lowercased alphanumeric tokens, stopwords removed
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

impl RelevanceScorer for LexicalScorer {
    fn score(&self, query: &str, passage: &str) -> Result<f32> {
        let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
        if query_terms.is_empty() {
            return Ok(0.0);
        }

        let tokens = tokenize(passage);
        let dl = tokens.len() as f32;
        let mut tf: HashMap<&str, u32> = HashMap::new();
        for token in &tokens {
            if query_terms.contains(token) {
                *tf.entry(token.as_str()).or_insert(0) += 1;
            }
        }

        let norm = K1 * (1.0 - B + B * dl / REFERENCE_LENGTH);
        let saturated: f32 = tf
            .values()
            .map(|&count| {
                let count = count as f32;
                count * (K1 + 1.0) / (count + norm)
            })
            .sum();

        let coverage = tf.len() as f32 / query_terms.len() as f32;
        Ok(saturated * (0.5 + coverage))
    }

    fn name(&self) -> &str {
        "lexical"
    }
}
