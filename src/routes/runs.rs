use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::config::{RUN_LIST_DEFAULT_LIMIT, RUN_LIST_MAX_LIMIT};
use crate::error::InspectorError;
use crate::model::{NetworkMock, Run, StepRecord};
use crate::state::SharedState;

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchRequest {
    pub agent_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AdhocDispatchRequest {
    pub agent_id: Option<i64>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub network_mocks: Vec<NetworkMock>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Run>, InspectorError> {
    state
        .store
        .get_run(id)?
        .map(Json)
        .ok_or_else(|| InspectorError::NotFound(format!("Run #{}", id)))
}

pub async fn scenario_runs(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Run>>, InspectorError> {
    if state.store.get_scenario(id)?.is_none() {
        return Err(InspectorError::NotFound(format!("Scenario #{}", id)));
    }
    let limit = query
        .limit
        .unwrap_or(RUN_LIST_DEFAULT_LIMIT)
        .clamp(1, RUN_LIST_MAX_LIMIT);
    Ok(Json(state.store.recent_runs(id, limit)?))
}

pub async fn dispatch_scenario(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    body: Option<Json<DispatchRequest>>,
) -> Result<(StatusCode, Json<Run>), InspectorError> {
    let agent_id = body.and_then(|Json(req)| req.agent_id);
    let run = state.dispatcher.dispatch_scenario(id, agent_id).await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}

pub async fn dispatch_adhoc(
    State(state): State<SharedState>,
    Path(project_id): Path<i64>,
    Json(req): Json<AdhocDispatchRequest>,
) -> Result<(StatusCode, Json<Run>), InspectorError> {
    let run = state
        .dispatcher
        .dispatch_adhoc(project_id, req.agent_id, &req.steps, &req.network_mocks)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(run)))
}
