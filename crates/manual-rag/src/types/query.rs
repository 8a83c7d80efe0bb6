//! Request types

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Chat request carrying the user's question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The question to answer
    pub message: String,
}

impl ChatRequest {
    /// Trimmed question, rejecting empty input
    pub fn question(&self) -> Result<&str> {
        let question = self.message.trim();
        if question.is_empty() {
            return Err(Error::InvalidQuery("message must not be empty".to_string()));
        }
        Ok(question)
    }
}
