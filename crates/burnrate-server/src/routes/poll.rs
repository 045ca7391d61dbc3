use axum::Json;
use axum::extract::State;
use burnrate_collector::PollRunReport;

use crate::error::ApiErrorResponse;
use crate::state::AppState;

/// `POST /api/v1/poll` runs the collector once and returns its report.
pub async fn poll(State(state): State<AppState>) -> Result<Json<PollRunReport>, ApiErrorResponse> {
    let report = state.collector.run().await?;
    Ok(Json(report))
}
