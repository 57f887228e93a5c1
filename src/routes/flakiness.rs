use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use crate::config::FLAKINESS_THRESHOLD;
use crate::error::InspectorError;
use crate::flakiness::FlakinessReport;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub analyzed: bool,
    pub message: String,
    pub flakiness: Option<FlakinessReport>,
}

pub async fn get_flakiness(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<FlakinessReport>, InspectorError> {
    state
        .store
        .get_flakiness(id)?
        .map(|record| Json(record.into()))
        .ok_or_else(|| InspectorError::NotFound(format!("Flakiness record for scenario #{}", id)))
}

/// Records above the flaky threshold, most flaky first.
pub async fn flaky_tests(
    State(state): State<SharedState>,
) -> Result<Json<Vec<FlakinessReport>>, InspectorError> {
    let records = state.store.list_flaky(FLAKINESS_THRESHOLD)?;
    Ok(Json(records.into_iter().map(FlakinessReport::from).collect()))
}

pub async fn analyze(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<AnalyzeResponse>, InspectorError> {
    if state.store.get_scenario(id)?.is_none() {
        return Err(InspectorError::NotFound(format!("Scenario #{}", id)));
    }

    let response = match state.analyzer.analyze(id).await? {
        Some(record) => AnalyzeResponse {
            analyzed: true,
            message: format!("Flakiness score: {}%", record.flakiness_score),
            flakiness: Some(record.into()),
        },
        None => AnalyzeResponse {
            analyzed: false,
            message: "Not enough runs for flakiness analysis".to_string(),
            flakiness: None,
        },
    };
    Ok(Json(response))
}
