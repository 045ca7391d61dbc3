//! Provider usage APIs.
//!
//! Only providers with an organization-level usage endpoint are polled.
//! Everything else has to be metered client-side with the tracker.

use crate::config::CollectorConfig;
use crate::error::{CollectorError, ProviderError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Providers without a public usage API.
pub const SDK_ONLY_PROVIDERS: &[&str] = &["google", "groq", "nvidia", "deepseek", "kimi", "qwen"];

/// Page limit guarding against endless pagination.
const MAX_PAGES: usize = 10;

/// True when a provider can only be metered with the tracker.
pub fn is_sdk_only(provider: &str) -> bool {
    SDK_ONLY_PROVIDERS
        .iter()
        .any(|p| p.eq_ignore_ascii_case(provider))
}

/// Token usage for one model in one time bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketUsage {
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub bucket_start: DateTime<Utc>,
    pub bucket_end: DateTime<Utc>,
}

/// A provider usage API.
#[async_trait]
pub trait UsagePoller: Send + Sync {
    /// Provider identifier as stored on credentials.
    fn provider(&self) -> &'static str;

    /// Shown to the owner when the provider rejects their key.
    fn key_hint(&self) -> &'static str;

    /// Hourly usage grouped by model between `since` and `until`.
    async fn fetch_usage(
        &self,
        secret: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<BucketUsage>, ProviderError>;
}

fn http_client(timeout_secs: u64) -> crate::error::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| CollectorError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

async fn read_page<T: serde::de::DeserializeOwned>(
    provider: &str,
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ProviderError::from_http_status(provider, status.as_u16(), body));
    }
    let body = response.text().await.map_err(|e| ProviderError::Transport {
        provider: provider.to_string(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&body).map_err(|e| ProviderError::Decode {
        provider: provider.to_string(),
        message: e.to_string(),
    })
}

// ============ OpenAI ============

#[derive(Debug, Deserialize)]
struct OpenAiPage {
    #[serde(default)]
    data: Vec<OpenAiBucket>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiBucket {
    start_time: i64,
    end_time: i64,
    #[serde(default)]
    results: Vec<OpenAiResult>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResult {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

/// OpenAI organization usage (`/v1/organization/usage/completions`).
pub struct OpenAiPoller {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

impl OpenAiPoller {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> crate::error::Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }
}

#[async_trait]
impl UsagePoller for OpenAiPoller {
    fn provider(&self) -> &'static str {
        "openai"
    }

    fn key_hint(&self) -> &'static str {
        "Requires an Admin API key from platform.openai.com/settings/organization/admin-keys"
    }

    async fn fetch_usage(
        &self,
        secret: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<BucketUsage>, ProviderError> {
        let url = format!("{}/v1/organization/usage/completions", self.base_url);
        let hours = ((until - since).num_hours() + 1).clamp(1, 168).to_string();
        let mut usage = Vec::new();
        let mut page: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("start_time", since.timestamp().to_string()),
                ("end_time", until.timestamp().to_string()),
                ("bucket_width", "1h".to_string()),
                ("group_by", "model".to_string()),
                ("limit", hours.clone()),
            ];
            if let Some(cursor) = &page {
                query.push(("page", cursor.clone()));
            }

            debug!(url = %url, page = ?page, "Polling OpenAI usage");
            let response = self
                .client
                .get(&url)
                .bearer_auth(secret)
                .query(&query)
                .send()
                .await
                .map_err(|e| ProviderError::from_transport("OpenAI", e, self.timeout_secs))?;
            let body: OpenAiPage = read_page("OpenAI", response).await?;

            for bucket in body.data {
                let (Some(start), Some(end)) = (
                    DateTime::from_timestamp(bucket.start_time, 0),
                    DateTime::from_timestamp(bucket.end_time, 0),
                ) else {
                    continue;
                };
                usage.extend(bucket.results.into_iter().map(|r| BucketUsage {
                    model: r.model.unwrap_or_else(|| "unknown".to_string()),
                    input_tokens: r.input_tokens.max(0),
                    output_tokens: r.output_tokens.max(0),
                    bucket_start: start,
                    bucket_end: end,
                }));
            }

            match body.next_page {
                Some(next) if body.has_more => page = Some(next),
                _ => break,
            }
        }

        Ok(usage)
    }
}

// ============ Anthropic ============

#[derive(Debug, Deserialize)]
struct AnthropicPage {
    #[serde(default)]
    data: Vec<AnthropicBucket>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    next_page: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBucket {
    starting_at: DateTime<Utc>,
    ending_at: DateTime<Utc>,
    #[serde(default)]
    results: Vec<AnthropicResult>,
}

#[derive(Debug, Default, Deserialize)]
struct AnthropicCacheCreation {
    #[serde(default)]
    ephemeral_1h_input_tokens: i64,
    #[serde(default)]
    ephemeral_5m_input_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct AnthropicResult {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    uncached_input_tokens: i64,
    #[serde(default)]
    cache_read_input_tokens: i64,
    #[serde(default)]
    cache_creation: Option<AnthropicCacheCreation>,
    #[serde(default)]
    output_tokens: i64,
}

impl AnthropicResult {
    fn input_tokens(&self) -> i64 {
        let creation = self
            .cache_creation
            .as_ref()
            .map(|c| c.ephemeral_1h_input_tokens.saturating_add(c.ephemeral_5m_input_tokens))
            .unwrap_or(0);
        self.uncached_input_tokens
            .saturating_add(self.cache_read_input_tokens)
            .saturating_add(creation)
    }
}

/// Anthropic Admin usage report (`/v1/organizations/usage_report/messages`).
pub struct AnthropicPoller {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
}

impl AnthropicPoller {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> crate::error::Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs,
        })
    }
}

#[async_trait]
impl UsagePoller for AnthropicPoller {
    fn provider(&self) -> &'static str {
        "anthropic"
    }

    fn key_hint(&self) -> &'static str {
        "Requires an Admin API key starting with sk-ant-admin..."
    }

    async fn fetch_usage(
        &self,
        secret: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<BucketUsage>, ProviderError> {
        let url = format!("{}/v1/organizations/usage_report/messages", self.base_url);
        let hours = ((until - since).num_hours() + 1).clamp(1, 168).to_string();
        let mut usage = Vec::new();
        let mut page: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("starting_at", since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
                ("ending_at", until.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
                ("bucket_width", "1h".to_string()),
                ("group_by[]", "model".to_string()),
                ("limit", hours.clone()),
            ];
            if let Some(cursor) = &page {
                query.push(("page", cursor.clone()));
            }

            debug!(url = %url, page = ?page, "Polling Anthropic usage");
            let response = self
                .client
                .get(&url)
                .header("x-api-key", secret)
                .header("anthropic-version", "2023-06-01")
                .query(&query)
                .send()
                .await
                .map_err(|e| ProviderError::from_transport("Anthropic", e, self.timeout_secs))?;
            let body: AnthropicPage = read_page("Anthropic", response).await?;

            for bucket in body.data {
                usage.extend(bucket.results.iter().map(|r| BucketUsage {
                    model: r
                        .model
                        .clone()
                        .unwrap_or_else(|| "claude-sonnet-4-5".to_string()),
                    input_tokens: r.input_tokens().max(0),
                    output_tokens: r.output_tokens.max(0),
                    bucket_start: bucket.starting_at,
                    bucket_end: bucket.ending_at,
                }));
            }

            match body.next_page {
                Some(next) if body.has_more => page = Some(next),
                _ => break,
            }
        }

        Ok(usage)
    }
}

/// Pollers keyed by provider identifier.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    pollers: HashMap<String, Arc<dyn UsagePoller>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the OpenAI and Anthropic pollers.
    pub fn from_config(config: &CollectorConfig) -> crate::error::Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(OpenAiPoller::new(
            &config.openai_base_url,
            config.timeout_secs,
        )?));
        registry.register(Arc::new(AnthropicPoller::new(
            &config.anthropic_base_url,
            config.timeout_secs,
        )?));
        Ok(registry)
    }

    /// Add or replace a poller.
    pub fn register(&mut self, poller: Arc<dyn UsagePoller>) {
        self.pollers.insert(poller.provider().to_string(), poller);
    }

    /// Poller for a provider.
    pub fn get(&self, provider: &str) -> Option<Arc<dyn UsagePoller>> {
        self.pollers
            .get(&provider.to_ascii_lowercase())
            .map(Arc::clone)
    }

    /// Registered provider identifiers.
    pub fn providers(&self) -> Vec<&str> {
        let mut providers: Vec<&str> = self.pollers.keys().map(String::as_str).collect();
        providers.sort_unstable();
        providers
    }
}
