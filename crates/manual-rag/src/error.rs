//! Error types for the question-answering pipeline

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Empty or otherwise unusable query
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Similarity index unreachable or query rejected. Fatal for the request.
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    /// Relevance scorer unavailable or failed. Recovered by the coordinator.
    #[error("Reranking failed: {0}")]
    Reranking(String),

    /// Generation backend failed while producing the answer stream
    #[error("Generation failed: {0}")]
    Generation(String),

    /// Embedding error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// File parsing error
    #[error("Failed to parse file '{filename}': {message}")]
    FileParse { filename: String, message: String },

    /// Unsupported file type
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// Ingestion produced nothing insertable
    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    /// Stored document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Malformed request body
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a file parse error
    pub fn file_parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FileParse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// Create a retrieval error
    pub fn retrieval(message: impl Into<String>) -> Self {
        Self::Retrieval(message.into())
    }

    /// Create a reranking error
    pub fn reranking(message: impl Into<String>) -> Self {
        Self::Reranking(message.into())
    }

    /// Create a generation error
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation(message.into())
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error", msg.clone()),
            Error::InvalidQuery(msg) => (StatusCode::BAD_REQUEST, "invalid_query", msg.clone()),
            Error::Retrieval(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "retrieval_error", msg.clone())
            }
            Error::Reranking(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "reranking_error", msg.clone())
            }
            Error::Generation(msg) => (StatusCode::BAD_GATEWAY, "generation_error", msg.clone()),
            Error::Embedding(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "embedding_error", msg.clone())
            }
            Error::FileParse { filename, message } => (
                StatusCode::BAD_REQUEST,
                "parse_error",
                format!("Failed to parse '{}': {}", filename, message),
            ),
            Error::UnsupportedFileType(ext) => (
                StatusCode::BAD_REQUEST,
                "unsupported_type",
                format!("Security check failed: {}", ext),
            ),
            Error::Ingestion(msg) => (StatusCode::UNPROCESSABLE_ENTITY, "ingestion_error", msg.clone()),
            Error::DocumentNotFound(name) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("Document not found: {}", name),
            ),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            Error::Io(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
                err.to_string(),
            ),
            Error::Json(err) => (StatusCode::BAD_REQUEST, "json_error", err.to_string()),
            Error::Http(err) => (StatusCode::BAD_GATEWAY, "http_error", err.to_string()),
            Error::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.clone())
            }
        };

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
