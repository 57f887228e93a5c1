use axum::extract::State;
use axum::Json;

use crate::ai::element::{
    FindElementRequest, FindElementResponse, HealSelectorRequest, HealSelectorResponse,
};
use crate::config::AI_DESCRIPTION_MAX_CHARS;
use crate::error::InspectorError;
use crate::state::SharedState;

fn validate_description(description: &str) -> Result<(), InspectorError> {
    if description.trim().is_empty() {
        return Err(InspectorError::Validation(
            "description must not be empty".to_string(),
        ));
    }
    if description.chars().count() > AI_DESCRIPTION_MAX_CHARS {
        return Err(InspectorError::Validation(format!(
            "description must be at most {} characters",
            AI_DESCRIPTION_MAX_CHARS
        )));
    }
    Ok(())
}

pub async fn find_element(
    State(state): State<SharedState>,
    Json(req): Json<FindElementRequest>,
) -> Result<Json<FindElementResponse>, InspectorError> {
    validate_description(&req.description)?;
    Ok(Json(state.elements.find_element(&req).await))
}

pub async fn heal_selector(
    State(state): State<SharedState>,
    Json(req): Json<HealSelectorRequest>,
) -> Result<Json<HealSelectorResponse>, InspectorError> {
    validate_description(&req.description)?;
    Ok(Json(state.elements.heal_selector(&req).await))
}
