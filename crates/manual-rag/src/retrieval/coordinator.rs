//! Two-stage retrieval: broad similarity search, then precision reranking
//!
//! Broad retrieval pulls `k_broad` candidates from the similarity index
//! (cheap, approximate, recall-oriented). The relevance scorer then scores
//! every candidate against the query (expensive, exact, precision-oriented)
//! and the top `n_final` become the assembled context.
//!
//! Failure policy:
//! - index errors are fatal for the request (no retry);
//! - scorer errors of any kind degrade to broad-retrieval order with a warning.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::providers::{RelevanceScorer, SimilarityIndex};
use crate::types::{AssembledContext, PassageRecord, ScoredCandidate};

/// Orchestrates broad retrieval, reranking, selection and context assembly
pub struct RetrievalCoordinator {
    /// Similarity index (shared, read-only on this path)
    index: Arc<dyn SimilarityIndex>,
    /// Relevance scorer; `None` keeps broad-retrieval order
    scorer: Option<Arc<dyn RelevanceScorer>>,
    /// Candidates pulled from the index
    k_broad: usize,
    /// Passages kept for the context
    n_final: usize,
}

impl RetrievalCoordinator {
    /// Create a coordinator over already-initialized services
    pub fn new(
        index: Arc<dyn SimilarityIndex>,
        scorer: Option<Arc<dyn RelevanceScorer>>,
        config: &RetrievalConfig,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            index,
            scorer,
            k_broad: config.k_broad,
            n_final: config.n_final,
        })
    }

    pub fn k_broad(&self) -> usize {
        self.k_broad
    }

    pub fn n_final(&self) -> usize {
        self.n_final
    }

    /// Name of the active scorer, or "none"
    pub fn scorer_name(&self) -> &str {
        self.scorer.as_ref().map_or("none", |s| s.name())
    }

    /// The similarity index this coordinator reads from
    pub fn index(&self) -> &Arc<dyn SimilarityIndex> {
        &self.index
    }

    /// Turn a free-text query into an ordered, page-annotated context.
    ///
    /// Returns at most `n_final` passages. Zero candidates yield an empty
    /// context rather than an error.
    pub async fn retrieve_context(&self, query: &str) -> Result<AssembledContext> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidQuery("query must not be empty".to_string()));
        }

        let candidates = self
            .index
            .query(query, self.k_broad)
            .await
            .map_err(|e| match e {
                Error::Retrieval(_) => e,
                other => Error::retrieval(other.to_string()),
            })?;

        tracing::debug!(
            "Broad retrieval returned {} candidates from {} (k_broad = {})",
            candidates.len(),
            self.index.name(),
            self.k_broad
        );

        if candidates.is_empty() {
            tracing::info!("No candidates for query; assembling empty context");
            return Ok(AssembledContext::empty());
        }

        let Some(scorer) = &self.scorer else {
            tracing::debug!("No relevance scorer configured; keeping broad-retrieval order");
            return Ok(self.assemble_unranked(candidates));
        };

        match score_candidates(scorer, query, &candidates).await {
            Ok(scored) => {
                let scored = &scored[..scored.len().min(self.n_final)];
                tracing::debug!(
                    "Broad ranks of selected candidates: {:?}",
                    scored.iter().map(|c| c.retrieval_rank).collect::<Vec<_>>()
                );
                let selected: Vec<PassageRecord> =
                    scored.iter().map(|c| c.passage.clone()).collect();

                tracing::info!(
                    "Reranked {} candidates with {}, selected pages {:?}",
                    candidates.len(),
                    scorer.name(),
                    selected.iter().map(|p| p.page_number).collect::<Vec<_>>()
                );

                Ok(AssembledContext::assemble(selected, true))
            }
            Err(e) => {
                tracing::warn!(
                    "Reranking with {} failed, falling back to broad-retrieval order: {}",
                    scorer.name(),
                    e
                );
                Ok(self.assemble_unranked(candidates))
            }
        }
    }

    fn assemble_unranked(&self, mut candidates: Vec<PassageRecord>) -> AssembledContext {
        candidates.truncate(self.n_final);
        AssembledContext::assemble(candidates, false)
    }
}

/// Score all candidates in one batch and sort them by descending relevance.
///
/// Runs on the blocking pool since scoring is CPU-bound. A panic inside the
/// scorer, a short score vector or a non-finite score all count as failure.
pub async fn score_candidates(
    scorer: &Arc<dyn RelevanceScorer>,
    query: &str,
    candidates: &[PassageRecord],
) -> Result<Vec<ScoredCandidate>> {
    let scorer = Arc::clone(scorer);
    let query = query.to_string();
    let texts: Vec<String> = candidates.iter().map(|c| c.content.clone()).collect();

    let scores = tokio::task::spawn_blocking(move || scorer.score_batch(&query, &texts))
        .await
        .map_err(|e| Error::reranking(format!("Scorer task failed: {}", e)))?
        .map_err(|e| match e {
            Error::Reranking(_) => e,
            other => Error::reranking(other.to_string()),
        })?;

    if scores.len() != candidates.len() {
        return Err(Error::reranking(format!(
            "Scorer returned {} scores for {} candidates",
            scores.len(),
            candidates.len()
        )));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(Error::reranking(format!("Scorer returned non-finite score {}", bad)));
    }

    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .cloned()
        .zip(scores)
        .enumerate()
        .map(|(retrieval_rank, (passage, relevance_score))| ScoredCandidate {
            passage,
            relevance_score,
            retrieval_rank,
        })
        .collect();

    // Stable sort: ties keep retrieval order
    scored.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
    });

    Ok(scored)
}
