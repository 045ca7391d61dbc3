use axum::Json;
use axum::extract::{Query, State};
use burnrate_cost::{CostError, Recommendation, RecommendationInput, UsageQuery};
use chrono::Utc;
use serde::Serialize;

use super::OwnerQuery;
use crate::error::ApiErrorResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RecommendationsResponse {
    pub user_id: String,
    pub recommendations: Vec<Recommendation>,
    /// Sum of the estimated savings
    pub total_estimated_saving: f64,
}

/// `GET /api/v1/recommendations?user_id=&days=`
pub async fn recommendations(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<RecommendationsResponse>, ApiErrorResponse> {
    let owner = query.owner()?.to_string();
    let days = query.days_or(state.recommender.config().lookback_days)?;
    let store = state.store.clone();
    let now = Utc::now();

    let (stats, month_to_date) = {
        let owner = owner.clone();
        tokio::task::spawn_blocking(move || {
            let usage = UsageQuery::new(store.as_ref());
            Ok::<_, CostError>((
                usage.usage_stats_last_days(&owner, days, now)?,
                usage.month_to_date(&owner, now)?,
            ))
        })
        .await??
    };

    let recommendations = state.recommender.recommend(&RecommendationInput {
        stats: &stats,
        month_to_date,
        monthly_budget: state.config.budgets.budget_for(&owner),
        now,
    });
    let total_estimated_saving = recommendations
        .iter()
        .fold(0.0, |total, r| total + r.estimated_saving);

    Ok(Json(RecommendationsResponse {
        user_id: owner,
        recommendations,
        total_estimated_saving,
    }))
}
