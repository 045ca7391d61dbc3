use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::ingest;
use crate::routes::{alerts, health, poll, recommendations, stats};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    // Producers call from browsers and arbitrary backends
    let cors = CorsLayer::permissive();
    let timeout = timeout_layer(state.config.request_timeout());

    Router::new()
        .route("/api/v1/health", get(health::health))
        .route("/api/v1/track-usage", post(ingest::track_usage))
        .route("/api/v1/poll", post(poll::poll))
        .route("/api/v1/stats", get(stats::stats))
        .route("/api/v1/alerts", get(alerts::alerts))
        .route("/api/v1/recommendations", get(recommendations::recommendations))
        .layer(timeout)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Requests running past `timeout` are answered with 408.
fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}
