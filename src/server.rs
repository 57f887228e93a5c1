use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::CALLBACK_PATH;
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(crate::routes::health::health))
        // Result ingestion
        .route(CALLBACK_PATH, post(crate::routes::webhook::receive_result))
        // Runs and dispatch
        .route("/api/runs/{id}", get(crate::routes::runs::get_run))
        .route(
            "/api/scenarios/{id}/runs",
            get(crate::routes::runs::scenario_runs),
        )
        .route(
            "/api/scenarios/{id}/dispatch",
            post(crate::routes::runs::dispatch_scenario),
        )
        .route(
            "/api/projects/{id}/dispatch",
            post(crate::routes::runs::dispatch_adhoc),
        )
        // Flakiness
        .route(
            "/api/scenarios/{id}/flakiness",
            get(crate::routes::flakiness::get_flakiness),
        )
        .route(
            "/api/scenarios/{id}/flakiness/analyze",
            post(crate::routes::flakiness::analyze),
        )
        .route(
            "/api/flaky-tests",
            get(crate::routes::flakiness::flaky_tests),
        )
        // AI collaborators
        .route(
            "/api/ai/find-element",
            post(crate::routes::ai::find_element),
        )
        .route(
            "/api/ai/heal-selector",
            post(crate::routes::ai::heal_selector),
        )
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
