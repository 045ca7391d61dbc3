use axum::Json;
use axum::extract::{Query, State};
use burnrate_cost::Alert;
use serde::Serialize;

use super::OwnerQuery;
use crate::error::ApiErrorResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub user_id: String,
    pub alerts: Vec<Alert>,
}

/// `GET /api/v1/alerts?user_id=` returns the owner's alerts from the last
/// evaluation cycle.
pub async fn alerts(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<AlertsResponse>, ApiErrorResponse> {
    let owner = query.owner()?;
    Ok(Json(AlertsResponse {
        user_id: owner.to_string(),
        alerts: state.alerts.current(owner),
    }))
}
