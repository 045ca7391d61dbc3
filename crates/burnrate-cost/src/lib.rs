//! # burnrate-cost
//!
//! Usage accounting for metered AI API calls.
//!
//! This crate provides:
//! - [`pricing`] - Static rate table turning token counts into cost
//! - [`UsageDatabase`] - SQLite storage behind the [`UsageStore`] trait
//! - [`UsageQuery`] - Burn rate, breakdowns, month-to-date and budget status
//! - [`AnomalyDetector`] / [`AlertBoard`] - Spend spike and leak detection
//! - [`Recommender`] - Heuristic savings recommendations
//!
//! ## Example
//!
//! ```no_run
//! use burnrate_cost::{UsageDatabase, UsageEvent, UsageQuery, UsageStore, pricing};
//! use chrono::Utc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let db = UsageDatabase::open("usage.db")?;
//!
//!     let cost = pricing::cost("openai", "gpt-4o", 1200, 300);
//!     db.insert_usage_event(&UsageEvent::new("user-1", "openai", "gpt-4o", 1200, 300, cost))?;
//!
//!     let rate = UsageQuery::new(&db).burn_rate("user-1", Utc::now())?;
//!     println!("Last hour: ${:.4}", rate.last_hour);
//!     Ok(())
//! }
//! ```

pub mod anomaly;
pub mod db;
pub mod error;
pub mod models;
pub mod optimizer;
pub mod pricing;
pub mod query;

// Re-export main types
pub use anomaly::{Alert, AlertBoard, AlertKind, AlertSeverity, AnomalyConfig, AnomalyDetector, SpendWindows};
pub use db::{UsageDatabase, UsageStore};
pub use error::{CostError, Result};
pub use models::{
    BudgetStatus, BurnRate, CallMetadata, CallOutcome, Credential, ModelUsage, PollError,
    ProjectedCost, ProviderCost, UsageEvent, UsageStats,
};
pub use optimizer::{
    OptimizerConfig, Recommendation, RecommendationInput, RecommendationKind,
    RecommendationSeverity, Recommender,
};
pub use query::UsageQuery;
