//! API routes for the question-answering server

pub mod chat;
pub mod files;
pub mod query;
pub mod upload;

use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};

use crate::server::state::AppState;

/// Build all API routes
pub fn api_routes(max_upload_size: usize) -> Router<AppState> {
    Router::new()
        .route(
            "/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::max(max_upload_size)),
        )
        .route("/chat", post(chat::chat))
        .route("/query", post(query::query))
        .route("/files/:filename", get(files::get_file))
        .route("/info", get(info))
}

/// API info endpoint
async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.config();
    let indexed = state.index().len().await.unwrap_or(0);

    Json(serde_json::json!({
        "name": "manual-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Question answering over technical manuals with page citations",
        "retrieval": {
            "k_broad": state.pipeline().coordinator().k_broad(),
            "n_final": state.pipeline().coordinator().n_final(),
            "scorer": state.pipeline().coordinator().scorer_name(),
            "index": state.index().name(),
            "indexed_pages": indexed,
        },
        "generation": {
            "backend": state.llm().name(),
            "model": state.llm().model(),
            "temperature": config.llm.temperature,
        },
        "endpoints": {
            "POST /api/upload": "Upload a PDF or DOCX manual (multipart)",
            "POST /api/chat": "Streamed plain-text answer with [Page X] citations",
            "POST /api/query": "Complete answer with extracted citations (JSON)",
            "GET /api/files/:filename": "Download an indexed PDF",
            "GET /api/info": "This description"
        }
    }))
}
