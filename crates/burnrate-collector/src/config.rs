//! Collector configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com";

/// Default Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Poll collector configuration (the `collector` section of the service config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Seconds between scheduled poll runs (default: 900)
    pub interval_secs: u64,

    /// Credentials polled at the same time (default: 4)
    pub concurrency: usize,

    /// Timeout for each provider request in seconds (default: 30)
    pub timeout_secs: u64,

    /// Hours of history requested from each provider (default: 24)
    pub window_hours: i64,

    /// OpenAI API base URL
    pub openai_base_url: String,

    /// Anthropic API base URL
    pub anthropic_base_url: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 900,
            concurrency: 4,
            timeout_secs: 30,
            window_hours: 24,
            openai_base_url: OPENAI_BASE_URL.to_string(),
            anthropic_base_url: ANTHROPIC_BASE_URL.to_string(),
        }
    }
}

impl CollectorConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point both providers at one base URL (tests and proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.openai_base_url = base_url.clone();
        self.anthropic_base_url = base_url;
        self
    }

    /// Set the concurrency bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the request timeout.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs.max(1);
        self
    }

    /// Interval between scheduled runs.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
