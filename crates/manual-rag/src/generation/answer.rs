//! Grounded answer generation over an assembled context

use std::sync::Arc;

use crate::providers::LlmProvider;
use crate::types::AssembledContext;

use super::prompt::{PromptBuilder, NOT_FOUND_ANSWER};
use super::stream::AnswerStream;

/// Builds the grounded prompt and opens the answer stream
pub struct AnswerGenerator {
    llm: Arc<dyn LlmProvider>,
}

impl AnswerGenerator {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// The generation backend
    pub fn llm(&self) -> &Arc<dyn LlmProvider> {
        &self.llm
    }

    /// Stream an answer to `query` grounded in `context`.
    ///
    /// An empty context short-circuits to the not-found answer without
    /// calling the backend. Otherwise the backend is not contacted until the
    /// returned stream is first polled.
    pub fn generate_answer(&self, query: &str, context: &AssembledContext) -> AnswerStream {
        if context.is_empty() {
            tracing::info!("Empty context, answering '{}'", NOT_FOUND_ANSWER);
            return AnswerStream::fixed(NOT_FOUND_ANSWER);
        }

        let prompt = PromptBuilder::grounded_prompt(query, context);
        tracing::debug!(
            "Prompt built: {} chars, pages {:?}, model {}",
            prompt.len(),
            context.pages(),
            self.llm.model()
        );

        AnswerStream::new(self.llm.stream_completion(prompt))
    }
}
