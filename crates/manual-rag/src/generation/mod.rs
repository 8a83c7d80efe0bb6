//! Answer generation: prompt, streaming and citation handling

pub mod answer;
pub mod citation;
pub mod ollama;
pub mod prompt;
pub mod stream;

pub use answer::AnswerGenerator;
pub use citation::extract_page_citations;
pub use ollama::OllamaClient;
pub use prompt::{PromptBuilder, NOT_FOUND_ANSWER};
pub use stream::AnswerStream;
