use axum::Json;
use axum::extract::{Query, State};
use burnrate_cost::{BudgetStatus, BurnRate, CostError, ProjectedCost, UsageQuery, UsageStats};
use chrono::Utc;
use serde::Serialize;

use super::OwnerQuery;
use crate::error::ApiErrorResponse;
use crate::state::AppState;

/// Days of history in `stats` when no `days` parameter is given.
pub const DEFAULT_STATS_DAYS: i64 = 30;

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub stats: UsageStats,
    pub burn_rate: BurnRate,
    pub budget: BudgetStatus,
    pub projection: ProjectedCost,
}

/// `GET /api/v1/stats?user_id=&days=`
pub async fn stats(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<StatsResponse>, ApiErrorResponse> {
    let owner = query.owner()?.to_string();
    let days = query.days_or(DEFAULT_STATS_DAYS)?;
    let monthly_budget = state.config.budgets.budget_for(&owner);
    let store = state.store.clone();
    let now = Utc::now();

    let response = tokio::task::spawn_blocking(move || {
        let usage = UsageQuery::new(store.as_ref());
        let stats = usage.usage_stats_last_days(&owner, days, now)?;
        let burn_rate = usage.burn_rate(&owner, now)?;
        let budget = usage.budget_status(&owner, monthly_budget, now)?;
        let projection = ProjectedCost::for_month(budget.month_to_date, now);

        Ok::<_, CostError>(StatsResponse {
            stats,
            burn_rate,
            budget,
            projection,
        })
    })
    .await??;

    Ok(Json(response))
}
