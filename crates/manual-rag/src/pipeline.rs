//! Question-answering pipeline: retrieve context, then stream a grounded answer

use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::generation::{extract_page_citations, AnswerGenerator, AnswerStream};
use crate::retrieval::RetrievalCoordinator;
use crate::types::{AssembledContext, QueryResponse};

/// Retrieval coordinator and answer generator wired together
#[derive(Clone)]
pub struct AnswerPipeline {
    coordinator: Arc<RetrievalCoordinator>,
    generator: Arc<AnswerGenerator>,
}

impl AnswerPipeline {
    pub fn new(coordinator: Arc<RetrievalCoordinator>, generator: Arc<AnswerGenerator>) -> Self {
        Self {
            coordinator,
            generator,
        }
    }

    pub fn coordinator(&self) -> &RetrievalCoordinator {
        &self.coordinator
    }

    pub fn generator(&self) -> &AnswerGenerator {
        &self.generator
    }

    /// Retrieve the context for `query` and open its answer stream.
    ///
    /// Retrieval errors are returned here, before any fragment exists.
    pub async fn ask(&self, query: &str) -> Result<(AssembledContext, AnswerStream)> {
        let context = self.coordinator.retrieve_context(query).await?;
        let stream = self.generator.generate_answer(query.trim(), &context);
        Ok((context, stream))
    }

    /// Answer `query` in full and extract the citations it makes
    pub async fn answer_collected(&self, query: &str) -> Result<QueryResponse> {
        let start = Instant::now();
        let (context, stream) = self.ask(query).await?;
        let (answer, degraded) = stream.collect_text().await;
        let citations = extract_page_citations(&answer, &context)?;

        tracing::info!(
            "Answered with {} citations over pages {:?} in {:?}",
            citations.len(),
            context.pages(),
            start.elapsed()
        );

        Ok(QueryResponse {
            answer,
            citations,
            pages: context.pages(),
            reranked: context.is_reranked(),
            degraded,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}
