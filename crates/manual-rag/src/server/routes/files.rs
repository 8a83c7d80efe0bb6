//! Stored document download

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::{Error, Result};
use crate::server::state::AppState;

/// GET /api/files/:filename - Serve an indexed PDF so cited pages can be opened
pub async fn get_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Response> {
    let path = state
        .ingest()
        .stored_path(&filename)
        .ok_or_else(|| Error::DocumentNotFound(filename.clone()))?;

    let data = tokio::fs::read(&path).await?;
    let content_type = if filename.to_ascii_lowercase().ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/octet-stream"
    };

    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}
