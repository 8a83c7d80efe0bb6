//! Document upload endpoint

use axum::{
    extract::{Multipart, State},
    Json,
};

use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::types::UploadResponse;

/// POST /api/upload - Validate, convert and index one manual
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::BadRequest(format!("Failed to read multipart field: {}", e)))?
    {
        let Some(filename) = field.file_name().map(|s| s.to_string()) else {
            continue;
        };

        let data = field
            .bytes()
            .await
            .map_err(|e| Error::BadRequest(format!("Failed to read {}: {}", filename, e)))?;

        tracing::info!("Upload: {} ({} bytes)", filename, data.len());

        let response = state.ingest().ingest(&filename, data.to_vec()).await?;
        return Ok(Json(response));
    }

    Err(Error::BadRequest("No file field in upload".to_string()))
}
