//! Savings recommendations derived from aggregated usage.
//!
//! The engine is a pure function of its input: aggregated [`UsageStats`]
//! over a lookback window plus month-to-date spend and the owner's budget.
//! Four heuristics are applied:
//! - **Provider concentration**: one provider carries most of the spend
//! - **Model downgrade**: heavy use of a premium model with a cheaper substitute
//! - **Prompt caching**: enough volume that caching repeated prompts pays off
//! - **Budget burn rate**: the month is on track to exceed the budget
//!
//! ## Usage
//!
//! ```no_run
//! use burnrate_cost::{UsageDatabase, UsageQuery, Recommender, OptimizerConfig, RecommendationInput};
//! use chrono::Utc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let db = UsageDatabase::open("usage.db")?;
//!     let query = UsageQuery::new(&db);
//!     let now = Utc::now();
//!
//!     let config = OptimizerConfig::default();
//!     let stats = query.usage_stats_last_days("user-1", config.lookback_days, now)?;
//!     let month_to_date = query.month_to_date("user-1", now)?;
//!
//!     let recommender = Recommender::new(config);
//!     for rec in recommender.recommend(&RecommendationInput {
//!         stats: &stats,
//!         month_to_date,
//!         monthly_budget: 200.0,
//!         now,
//!     }) {
//!         println!("{}: save ${:.2}", rec.title, rec.estimated_saving);
//!     }
//!     Ok(())
//! }
//! ```

use crate::models::{UsageStats, days_in_month};
use crate::pricing;
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Kind of recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    ProviderConcentration,
    ModelDowngrade,
    PromptCaching,
    BudgetBurnRate,
}

/// Recommendation severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationSeverity {
    Info,
    High,
}

/// A single savings suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub severity: RecommendationSeverity,
    pub title: String,
    pub description: String,

    /// Estimated saving, or for budget warnings the projected overspend
    pub estimated_saving: f64,

    pub action: String,
}

/// Configuration for the recommendation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Provider share of total cost above which concentration is flagged (default: 0.70)
    pub concentration_share: f64,

    /// Fraction of the provider's cost saved by spreading load (default: 0.25)
    pub concentration_saving: f64,

    /// Minimum tokens on a premium model before suggesting a downgrade (default: 100,000)
    pub downgrade_min_tokens: i64,

    /// Fraction of the model's cost saved by downgrading (default: 0.60)
    pub downgrade_saving: f64,

    /// Minimum total tokens before suggesting prompt caching (default: 500,000)
    pub caching_min_tokens: i64,

    /// Fraction of total cost saved by caching (default: 0.20)
    pub caching_saving: f64,

    /// Projected month spend above this fraction of budget raises a warning (default: 0.9)
    pub budget_warning_ratio: f64,

    /// Historical lookback days for usage analysis (default: 30)
    pub lookback_days: i64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            concentration_share: 0.70,
            concentration_saving: 0.25,
            downgrade_min_tokens: 100_000,
            downgrade_saving: 0.60,
            caching_min_tokens: 500_000,
            caching_saving: 0.20,
            budget_warning_ratio: 0.9,
            lookback_days: 30,
        }
    }
}

impl OptimizerConfig {
    /// Create a new optimizer configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the concentration share threshold.
    pub fn with_concentration_share(mut self, share: f64) -> Self {
        self.concentration_share = share.clamp(0.0, 1.0);
        self
    }

    /// Set the budget warning ratio.
    pub fn with_budget_warning_ratio(mut self, ratio: f64) -> Self {
        self.budget_warning_ratio = ratio.max(0.0);
        self
    }

    /// Set the lookback window.
    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback_days = days.max(1);
        self
    }
}

/// Everything the engine looks at.
#[derive(Debug, Clone, Copy)]
pub struct RecommendationInput<'a> {
    /// Usage aggregated over the lookback window
    pub stats: &'a UsageStats,
    pub month_to_date: f64,
    pub monthly_budget: f64,
    pub now: DateTime<Utc>,
}

/// Heuristic savings recommender.
#[derive(Debug, Clone, Default)]
pub struct Recommender {
    config: OptimizerConfig,
}

impl Recommender {
    pub fn new(config: OptimizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Recommendations sorted by estimated saving, largest first.
    pub fn recommend(&self, input: &RecommendationInput<'_>) -> Vec<Recommendation> {
        let stats = input.stats;
        if stats.is_empty() && input.month_to_date <= 0.0 {
            return Vec::new();
        }

        let mut recs = Vec::new();
        recs.extend(self.provider_concentration(stats));
        recs.extend(self.model_downgrades(stats));
        recs.extend(self.prompt_caching(stats));
        recs.extend(self.budget_burn(input));

        recs.sort_by(|a, b| b.estimated_saving.total_cmp(&a.estimated_saving));
        recs
    }

    fn provider_concentration(&self, stats: &UsageStats) -> Vec<Recommendation> {
        if stats.total_cost <= 0.0 {
            return Vec::new();
        }

        stats
            .by_provider
            .iter()
            .filter_map(|provider| {
                let share = provider.total_cost / stats.total_cost;
                (share > self.config.concentration_share).then(|| Recommendation {
                    kind: RecommendationKind::ProviderConcentration,
                    severity: RecommendationSeverity::Info,
                    title: format!("Diversify away from {}", provider.provider),
                    description: format!(
                        "{} accounts for {:.0}% of spend (${:.2} of ${:.2})",
                        provider.provider,
                        share * 100.0,
                        provider.total_cost,
                        stats.total_cost
                    ),
                    estimated_saving: provider.total_cost * self.config.concentration_saving,
                    action: "Route simpler workloads to a cheaper provider".to_string(),
                })
            })
            .collect()
    }

    fn model_downgrades(&self, stats: &UsageStats) -> Vec<Recommendation> {
        stats
            .by_model
            .iter()
            .filter(|m| m.total_tokens() > self.config.downgrade_min_tokens)
            .filter_map(|m| {
                let substitute = pricing::cheaper_substitute(&m.model)?;
                Some(Recommendation {
                    kind: RecommendationKind::ModelDowngrade,
                    severity: RecommendationSeverity::Info,
                    title: format!("Switch {} to {}", m.model, substitute),
                    description: format!(
                        "{} used {} tokens costing ${:.2}",
                        m.model,
                        m.total_tokens(),
                        m.total_cost
                    ),
                    estimated_saving: m.total_cost * self.config.downgrade_saving,
                    action: format!("Use {} for tasks that do not need {}", substitute, m.model),
                })
            })
            .collect()
    }

    fn prompt_caching(&self, stats: &UsageStats) -> Option<Recommendation> {
        (stats.total_tokens() > self.config.caching_min_tokens).then(|| Recommendation {
            kind: RecommendationKind::PromptCaching,
            severity: RecommendationSeverity::Info,
            title: "Enable prompt caching".to_string(),
            description: format!(
                "{} tokens processed; repeated prompt prefixes can be cached",
                stats.total_tokens()
            ),
            estimated_saving: stats.total_cost * self.config.caching_saving,
            action: "Cache system prompts and shared context".to_string(),
        })
    }

    fn budget_burn(&self, input: &RecommendationInput<'_>) -> Option<Recommendation> {
        let day = input.now.day() as f64;
        let month_days = days_in_month(input.now.year(), input.now.month()) as f64;
        let projection = input.month_to_date / day * month_days;

        (projection > self.config.budget_warning_ratio * input.monthly_budget).then(|| {
            Recommendation {
                kind: RecommendationKind::BudgetBurnRate,
                severity: RecommendationSeverity::High,
                title: "Monthly budget at risk".to_string(),
                description: format!(
                    "Projected month spend ${:.2} against a ${:.2} budget (${:.2} so far)",
                    projection, input.monthly_budget, input.month_to_date
                ),
                estimated_saving: (projection - input.monthly_budget).max(0.0),
                action: "Reduce usage or raise the budget before month end".to_string(),
            }
        })
    }
}
