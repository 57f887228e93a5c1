use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::model::RunStatus;
use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub queue: QueueHealth,
    pub runs: RunHealth,
    pub ai_configured: bool,
}

#[derive(Serialize)]
pub struct QueueHealth {
    pub reachable: bool,
    pub depth: Option<i64>,
}

#[derive(Serialize)]
pub struct RunHealth {
    pub queued: i64,
    pub processing: i64,
}

/// Overall status from queue reachability. Pure for testability.
pub fn determine_overall_status(queue_reachable: bool) -> &'static str {
    if queue_reachable {
        "healthy"
    } else {
        "degraded"
    }
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let depth = match state.queue.depth().await {
        Ok(depth) => Some(depth),
        Err(e) => {
            warn!("Queue depth unavailable: {}", e);
            None
        }
    };
    let count = |status| state.store.count_runs_by_status(status).unwrap_or(0);

    Json(HealthResponse {
        status: determine_overall_status(depth.is_some()).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        queue: QueueHealth {
            reachable: depth.is_some(),
            depth,
        },
        runs: RunHealth {
            queued: count(RunStatus::Queued),
            processing: count(RunStatus::Processing),
        },
        ai_configured: state.settings.ai.active_provider().is_some(),
    })
}
