//! Streaming chat endpoint

use axum::{
    body::Body,
    extract::State,
    http::{header, Response},
    Json,
};
use futures::StreamExt;
use std::convert::Infallible;

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::ChatRequest;

/// POST /api/chat - Stream a grounded answer as plain text.
///
/// Retrieval failures are reported as a JSON error before the body starts.
/// Generation failures after that appear in the body as a trailing
/// `[Error: ...]` fragment. A client disconnect drops the stream and stops
/// generation.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Response<Body>> {
    let question = request.question()?;
    tracing::info!("Chat: \"{}\"", question);

    let (context, stream) = state.pipeline().ask(question).await?;

    let pages = context
        .pages()
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let body = Body::from_stream(stream.map(|fragment| Ok::<_, Infallible>(fragment.into_string())));

    Response::builder()
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("x-context-pages", pages)
        .header("x-reranked", context.is_reranked().to_string())
        .body(body)
        .map_err(|e| Error::internal(format!("Failed to build response: {}", e)))
}
