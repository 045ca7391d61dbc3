//! Data models for usage accounting.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{CostError, Result};

/// Outcome of a tracked provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// The call returned normally
    Success,
    /// The call failed; the event carries zero cost
    Error,
}

/// Optional per-call metadata attached to a usage event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallMetadata {
    /// Wall-clock latency of the call in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    /// Whether the call succeeded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_status: Option<CallOutcome>,

    /// Error text for failed calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Any other keys sent by the producer, preserved as-is
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl CallMetadata {
    /// Metadata for a successful call.
    pub fn success(latency_ms: u64) -> Self {
        Self {
            latency_ms: Some(latency_ms),
            response_status: Some(CallOutcome::Success),
            ..Default::default()
        }
    }

    /// Metadata for a failed call.
    pub fn failure(latency_ms: u64, error: impl Into<String>) -> Self {
        Self {
            latency_ms: Some(latency_ms),
            response_status: Some(CallOutcome::Error),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// A single metered provider call or polled usage bucket.
///
/// Events are immutable once persisted. Field names on the wire follow the
/// ingestion contract (`user_id`, `tokens_input`, `tokens_output`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Store-assigned row id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Owner of the usage
    #[serde(rename = "user_id")]
    pub owner_id: String,

    /// Provider identifier (e.g., "openai", "anthropic")
    pub provider: String,

    /// Model identifier (e.g., "gpt-4o", "claude-3-haiku")
    pub model: String,

    /// Number of input tokens
    #[serde(rename = "tokens_input")]
    pub input_tokens: i64,

    /// Number of output tokens
    #[serde(rename = "tokens_output")]
    pub output_tokens: i64,

    /// Cost in account currency
    pub cost: f64,

    /// When the usage happened
    pub timestamp: DateTime<Utc>,

    /// Optional call metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<CallMetadata>,
}

impl UsageEvent {
    /// Create a new event stamped with the current time.
    pub fn new(
        owner_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        input_tokens: i64,
        output_tokens: i64,
        cost: f64,
    ) -> Self {
        Self {
            id: None,
            owner_id: owner_id.into(),
            provider: provider.into(),
            model: model.into(),
            input_tokens,
            output_tokens,
            cost,
            timestamp: Utc::now(),
            metadata: None,
        }
    }

    /// Set the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attach call metadata.
    pub fn with_metadata(mut self, metadata: CallMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Total tokens (input + output).
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// True when the event records a failed call.
    pub fn is_error(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| m.response_status)
            .is_some_and(|s| s == CallOutcome::Error)
    }

    /// Check the never-negative invariants and required identifiers.
    pub fn validate(&self) -> Result<()> {
        if self.owner_id.trim().is_empty() || self.provider.trim().is_empty() {
            return Err(CostError::Validation(
                "Missing user_id or provider".to_string(),
            ));
        }
        if self.input_tokens < 0 || self.output_tokens < 0 {
            return Err(CostError::Validation(
                "Token counts must not be negative".to_string(),
            ));
        }
        if !self.cost.is_finite() || self.cost < 0.0 {
            return Err(CostError::Validation(
                "Cost must be a non-negative number".to_string(),
            ));
        }
        Ok(())
    }
}

/// A provider credential registered by an owner.
///
/// The secret is opaque to this crate; decryption belongs to the vault.
#[derive(Clone, PartialEq)]
pub struct Credential {
    /// Store-assigned id
    pub id: i64,

    /// Owner of the credential
    pub owner_id: String,

    /// Provider identifier
    pub provider: String,

    /// Opaque secret as handed over by the vault
    pub encrypted_key: String,

    /// Cleared when the owner revokes the credential
    pub is_active: bool,

    /// Last successful poll
    pub last_used: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("provider", &self.provider)
            .field("encrypted_key", &"<redacted>")
            .field("is_active", &self.is_active)
            .field("last_used", &self.last_used)
            .finish()
    }
}

/// Diagnostic record of a failed provider poll. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollError {
    /// Store-assigned id
    pub id: Option<i64>,

    /// Owner of the credential that failed
    pub owner_id: String,

    /// Provider that was polled
    pub provider: String,

    /// Credential reference
    pub credential_id: i64,

    /// What went wrong
    pub error_message: String,

    /// When the failure was recorded
    pub created_at: DateTime<Utc>,
}

impl PollError {
    /// Create a poll error for a credential, stamped now.
    pub fn for_credential(credential: &Credential, error_message: impl Into<String>) -> Self {
        Self {
            id: None,
            owner_id: credential.owner_id.clone(),
            provider: credential.provider.clone(),
            credential_id: credential.id,
            error_message: error_message.into(),
            created_at: Utc::now(),
        }
    }
}

/// Cost and token totals for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCost {
    /// Provider identifier
    pub provider: String,

    /// Total cost
    pub total_cost: f64,

    /// Number of events
    pub event_count: i64,

    /// Total input tokens
    pub input_tokens: i64,

    /// Total output tokens
    pub output_tokens: i64,
}

/// Cost and token totals for one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    /// Provider the model was called through
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Total cost
    pub total_cost: f64,

    /// Number of events
    pub event_count: i64,

    /// Total input tokens
    pub input_tokens: i64,

    /// Total output tokens
    pub output_tokens: i64,
}

impl ModelUsage {
    /// Total tokens (input + output).
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Aggregated usage for one owner over a time range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Owner the stats belong to
    pub owner_id: String,

    /// Start of the range (inclusive)
    pub since: DateTime<Utc>,

    /// End of the range (inclusive)
    pub until: DateTime<Utc>,

    /// Total cost
    pub total_cost: f64,

    /// Number of events
    pub event_count: i64,

    /// Number of events recording failed calls
    pub error_count: i64,

    /// Total input tokens
    pub input_tokens: i64,

    /// Total output tokens
    pub output_tokens: i64,

    /// Per-provider breakdown, most expensive first
    pub by_provider: Vec<ProviderCost>,

    /// Per-model breakdown, most expensive first
    pub by_model: Vec<ModelUsage>,
}

impl UsageStats {
    /// Aggregate a slice of events.
    pub fn from_events(
        owner_id: impl Into<String>,
        events: &[UsageEvent],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Self {
        let mut by_provider: HashMap<&str, ProviderCost> = HashMap::new();
        let mut by_model: HashMap<(&str, &str), ModelUsage> = HashMap::new();

        let mut stats = Self {
            owner_id: owner_id.into(),
            since,
            until,
            total_cost: 0.0,
            event_count: 0,
            error_count: 0,
            input_tokens: 0,
            output_tokens: 0,
            by_provider: Vec::new(),
            by_model: Vec::new(),
        };

        for event in events {
            stats.total_cost += event.cost;
            stats.event_count += 1;
            stats.input_tokens = stats.input_tokens.saturating_add(event.input_tokens);
            stats.output_tokens = stats.output_tokens.saturating_add(event.output_tokens);
            if event.is_error() {
                stats.error_count += 1;
            }

            let provider = by_provider
                .entry(event.provider.as_str())
                .or_insert_with(|| ProviderCost {
                    provider: event.provider.clone(),
                    ..Default::default()
                });
            provider.total_cost += event.cost;
            provider.event_count += 1;
            provider.input_tokens = provider.input_tokens.saturating_add(event.input_tokens);
            provider.output_tokens = provider.output_tokens.saturating_add(event.output_tokens);

            let model = by_model
                .entry((event.provider.as_str(), event.model.as_str()))
                .or_insert_with(|| ModelUsage {
                    provider: event.provider.clone(),
                    model: event.model.clone(),
                    ..Default::default()
                });
            model.total_cost += event.cost;
            model.event_count += 1;
            model.input_tokens = model.input_tokens.saturating_add(event.input_tokens);
            model.output_tokens = model.output_tokens.saturating_add(event.output_tokens);
        }

        stats.by_provider = by_provider.into_values().collect();
        stats
            .by_provider
            .sort_by(|a, b| b.total_cost.total_cmp(&a.total_cost).then(a.provider.cmp(&b.provider)));

        stats.by_model = by_model.into_values().collect();
        stats
            .by_model
            .sort_by(|a, b| b.total_cost.total_cmp(&a.total_cost).then(a.model.cmp(&b.model)));

        stats
    }

    /// Total tokens (input + output).
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// True when no events were aggregated.
    pub fn is_empty(&self) -> bool {
        self.event_count == 0
    }
}

/// Current spend velocity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BurnRate {
    /// Cost in the trailing hour
    pub last_hour: f64,

    /// Cost in the trailing 24 hours
    pub last_24_hours: f64,

    /// Average hourly cost over the trailing 24 hours
    pub average_hourly: f64,
}

/// Month-to-date spend against the owner's budget.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    /// Spend since the first of the month
    pub month_to_date: f64,

    /// Monthly budget
    pub monthly_budget: f64,

    /// Budget left (negative when over budget)
    pub remaining: f64,

    /// Percentage of the budget used, capped at 100
    pub burn_percentage: f64,
}

impl BudgetStatus {
    /// Compute budget status from month-to-date spend.
    pub fn calculate(month_to_date: f64, monthly_budget: f64) -> Self {
        let burn_percentage = if monthly_budget > 0.0 {
            (month_to_date / monthly_budget * 100.0).min(100.0)
        } else if month_to_date > 0.0 {
            100.0
        } else {
            0.0
        };

        Self {
            month_to_date,
            monthly_budget,
            remaining: monthly_budget - month_to_date,
            burn_percentage,
        }
    }
}

/// Projected costs based on current usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedCost {
    /// Days remaining in projection period
    pub days_remaining: i32,

    /// Current spending rate per day
    pub daily_rate: f64,

    /// Projected total cost for the period
    pub projected_total: f64,

    /// Cost so far in the period
    pub current_total: f64,

    /// Confidence level (0-1)
    pub confidence: f64,
}

impl ProjectedCost {
    /// Calculate projected cost from current spending.
    pub fn calculate(current_total: f64, days_elapsed: i32, days_remaining: i32) -> Self {
        let daily_rate = if days_elapsed > 0 {
            current_total / days_elapsed as f64
        } else {
            0.0
        };

        let projected_total = current_total + (daily_rate * days_remaining as f64);

        // Confidence grows with a week of data
        let confidence = (days_elapsed as f64 / 7.0).min(1.0);

        Self {
            days_remaining,
            daily_rate,
            projected_total,
            current_total,
            confidence,
        }
    }

    /// Linear projection of month-to-date spend to the end of `now`'s month.
    pub fn for_month(month_to_date: f64, now: DateTime<Utc>) -> Self {
        let days_elapsed = now.day() as i32;
        let days_in_month = days_in_month(now.year(), now.month()) as i32;
        Self::calculate(month_to_date, days_elapsed, days_in_month - days_elapsed)
    }
}

/// Start of the calendar month containing `now` (UTC).
pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

/// Number of days in a calendar month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };

    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(start), Some(end)) => (end - start).num_days() as u32,
        _ => 30,
    }
}
