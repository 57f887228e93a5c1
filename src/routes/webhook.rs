use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::InspectorError;
use crate::ingest::IngestStatus;
use crate::model::ResultCallback;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
}

/// Worker result callback. The body is parsed here so every malformed
/// payload, syntax errors included, maps to 422.
pub async fn receive_result(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, InspectorError> {
    let callback: ResultCallback = serde_json::from_slice(&body)
        .map_err(|e| InspectorError::Validation(format!("Malformed result payload: {}", e)))?;

    let outcome = state.ingestion.ingest(callback).await?;
    let status = match outcome.status {
        IngestStatus::Applied(_) => "success",
        IngestStatus::Duplicate => "duplicate",
    };
    Ok(Json(WebhookResponse { status }))
}
