//! Tracker configuration.

use crate::error::{Result, TrackerError};
use std::time::Duration;

/// Default monthly budget used by the budget helpers.
pub const DEFAULT_MONTHLY_BUDGET: f64 = 200.0;

/// Default interval between timer-driven flushes.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(5000);

/// Default per-request delivery timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum number of queued events.
pub const DEFAULT_MAX_QUEUE: usize = 10_000;

/// Usage tracker configuration.
///
/// Built in code by the embedding application. There are no placeholder
/// defaults for the endpoint, key or owner; [`TrackerConfig::validate`]
/// rejects empty values.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Full URL of the ingestion endpoint (e.g., `http://host:8787/api/v1/track-usage`)
    pub endpoint: String,

    /// Bearer token sent with every delivery
    pub api_key: String,

    /// Owner the tracked usage is attributed to
    pub owner_id: String,

    /// Monthly budget for [`remaining_budget`](crate::UsageTracker::remaining_budget)
    pub monthly_budget: f64,

    /// Interval between timer-driven flushes
    pub flush_interval: Duration,

    /// Timeout for a single delivery request
    pub request_timeout: Duration,

    /// Queue bound; the oldest events are evicted beyond it
    pub max_queue: usize,

    /// First backoff delay after a failed delivery
    pub backoff_base: Duration,

    /// Upper bound for the backoff delay
    pub backoff_max: Duration,
}

impl TrackerConfig {
    /// Create a configuration with default tuning.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            owner_id: owner_id.into(),
            monthly_budget: DEFAULT_MONTHLY_BUDGET,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_queue: DEFAULT_MAX_QUEUE,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }

    /// Set the monthly budget.
    pub fn with_monthly_budget(mut self, budget: f64) -> Self {
        self.monthly_budget = budget;
        self
    }

    /// Set the flush interval.
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Set the delivery timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the queue bound.
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    /// Set the backoff range.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    /// Check that required values are present and tuning is sane.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("endpoint", &self.endpoint),
            ("api_key", &self.api_key),
            ("owner_id", &self.owner_id),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(TrackerError::Configuration(format!(
                    "{} must not be empty",
                    field
                )));
            }
        }

        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(TrackerError::Configuration(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.endpoint
            )));
        }
        if !self.monthly_budget.is_finite() || self.monthly_budget <= 0.0 {
            return Err(TrackerError::Configuration(
                "monthly_budget must be a positive number".to_string(),
            ));
        }
        if self.flush_interval.is_zero() || self.request_timeout.is_zero() {
            return Err(TrackerError::Configuration(
                "flush_interval and request_timeout must be non-zero".to_string(),
            ));
        }
        if self.max_queue == 0 {
            return Err(TrackerError::Configuration(
                "max_queue must be at least 1".to_string(),
            ));
        }
        if self.backoff_base > self.backoff_max {
            return Err(TrackerError::Configuration(
                "backoff_base must not exceed backoff_max".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> TrackerConfig {
        TrackerConfig::new("http://localhost:8787/api/v1/track-usage", "key", "user-1")
    }

    #[test]
    fn test_defaults() {
        let config = valid();
        assert_eq!(config.monthly_budget, 200.0);
        assert_eq!(config.flush_interval, Duration::from_millis(5000));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_queue, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_values_fail() {
        for config in [
            TrackerConfig::new("", "key", "user-1"),
            TrackerConfig::new("http://localhost", " ", "user-1"),
            TrackerConfig::new("http://localhost", "key", ""),
        ] {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, TrackerError::Configuration(_)));
        }
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let err = TrackerConfig::new("localhost:8787", "key", "user-1")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("http"));
    }

    #[test]
    fn test_rejects_bad_tuning() {
        assert!(valid().with_max_queue(0).validate().is_err());
        assert!(valid().with_monthly_budget(0.0).validate().is_err());
        assert!(
            valid()
                .with_backoff(Duration::from_secs(10), Duration::from_secs(1))
                .validate()
                .is_err()
        );
    }
}
