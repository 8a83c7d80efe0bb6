//! Non-streaming query endpoint

use axum::{extract::State, Json};

use crate::error::Result;
use crate::server::state::AppState;
use crate::types::{ChatRequest, QueryResponse};

/// POST /api/query - Full answer with the page citations it makes
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<QueryResponse>> {
    let question = request.question()?;
    tracing::info!("Query: \"{}\"", question);

    let response = state.pipeline().answer_collected(question).await?;
    Ok(Json(response))
}
