//! Prompt templates for grounded answer generation

use crate::types::AssembledContext;

/// Literal answer required when the context does not answer the question
pub const NOT_FOUND_ANSWER: &str = "Data Not Found.";

/// Prompt builder for grounded queries
pub struct PromptBuilder;

impl PromptBuilder {
    /// Build the grounded prompt. Context and question are embedded verbatim.
    pub fn grounded_prompt(question: &str, context: &AssembledContext) -> String {
        format!(
            r#"You are an expert technical assistant. Use ONLY the context below to answer the user's question.

RULES:
1. Every factual sentence MUST cite its source page in the form [Page X], using the page labels from the context.
2. If the context contains a [Visual Description: ...] or [Visual Note: ...] annotation relevant to the question, you may use it to describe the diagram or image (e.g. "As seen in the diagram on Page 5...").
3. If the context does not contain the answer, reply with exactly "{not_found}" and nothing else. Do not guess.

CONTEXT:
{context}

QUESTION:
{question}

ANSWER:"#,
            not_found = NOT_FOUND_ANSWER,
            context = context.as_str(),
            question = question
        )
    }
}
