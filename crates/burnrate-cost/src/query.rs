//! Aggregation queries over the usage event log.

use crate::db::UsageStore;
use crate::error::Result;
use crate::models::{BudgetStatus, BurnRate, UsageStats, start_of_month};
use chrono::{DateTime, Duration, Utc};

/// Query interface for usage aggregation.
pub struct UsageQuery<'a> {
    store: &'a dyn UsageStore,
}

impl<'a> UsageQuery<'a> {
    /// Create a new query interface.
    pub fn new(store: &'a dyn UsageStore) -> Self {
        Self { store }
    }

    /// Aggregated stats for an owner between two instants (inclusive).
    pub fn usage_stats(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<UsageStats> {
        let events = self.store.usage_events_between(owner_id, since, until)?;
        Ok(UsageStats::from_events(owner_id, &events, since, until))
    }

    /// Stats over the trailing `days` days ending at `now`.
    pub fn usage_stats_last_days(
        &self,
        owner_id: &str,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<UsageStats> {
        self.usage_stats(owner_id, now - Duration::days(days), now)
    }

    /// Total spend between two instants.
    pub fn spend_between(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<f64> {
        let events = self.store.usage_events_between(owner_id, since, until)?;
        Ok(events.iter().map(|e| e.cost).sum())
    }

    /// Spend in the trailing hour and day.
    pub fn burn_rate(&self, owner_id: &str, now: DateTime<Utc>) -> Result<BurnRate> {
        let events = self
            .store
            .usage_events_between(owner_id, now - Duration::hours(24), now)?;

        let hour_ago = now - Duration::hours(1);
        let last_hour = events
            .iter()
            .filter(|e| e.timestamp > hour_ago)
            .map(|e| e.cost)
            .sum();
        let last_24_hours: f64 = events.iter().map(|e| e.cost).sum();

        Ok(BurnRate {
            last_hour,
            last_24_hours,
            average_hourly: last_24_hours / 24.0,
        })
    }

    /// Spend since the first of `now`'s month.
    pub fn month_to_date(&self, owner_id: &str, now: DateTime<Utc>) -> Result<f64> {
        self.spend_between(owner_id, start_of_month(now), now)
    }

    /// Month-to-date spend against a monthly budget.
    pub fn budget_status(
        &self,
        owner_id: &str,
        monthly_budget: f64,
        now: DateTime<Utc>,
    ) -> Result<BudgetStatus> {
        let spent = self.month_to_date(owner_id, now)?;
        Ok(BudgetStatus::calculate(spent, monthly_budget))
    }

    /// Owners with any usage in the trailing `hours` hours.
    pub fn active_owners(&self, hours: i64, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.store.owners_with_usage_since(now - Duration::hours(hours))
    }
}
