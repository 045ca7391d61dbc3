//! Delivery of usage batches to the ingestion endpoint.

use crate::error::{Result, TrackerError};
use async_trait::async_trait;
use burnrate_cost::UsageEvent;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Where a flushed batch goes.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Deliver a batch. An `Err` means nothing was accepted and the batch
    /// should be retried.
    async fn deliver(&self, batch: &[UsageEvent]) -> Result<DeliveryReport>;
}

/// Outcome of an accepted delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    /// Entries the endpoint stored
    pub inserted: usize,
    /// Entries the endpoint refused individually
    pub rejected: Vec<RejectedEntry>,
}

/// One entry refused by the endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RejectedEntry {
    /// Position in the delivered batch
    #[serde(default)]
    pub index: Option<usize>,
    /// Reason given by the endpoint
    pub error: String,
}

#[derive(Serialize)]
struct Batch<'a> {
    metrics: &'a [UsageEvent],
}

#[derive(Deserialize)]
struct IngestResponse {
    #[serde(default)]
    inserted: Option<usize>,
    #[serde(default)]
    errors: Vec<RejectedEntry>,
}

/// Posts batches as `{"metrics": [...]}` with a bearer token.
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpSink {
    /// Create a sink with an explicit request timeout.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TrackerError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout,
        })
    }

    /// Endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl UsageSink for HttpSink {
    async fn deliver(&self, batch: &[UsageEvent]) -> Result<DeliveryReport> {
        debug!(endpoint = %self.endpoint, count = batch.len(), "Delivering usage batch");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&Batch { metrics: batch })
            .send()
            .await
            .map_err(|e| TrackerError::from_transport(e, self.timeout.as_secs()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::DeliveryRejected {
                status: status.as_u16(),
                body,
            });
        }

        // A 2xx without a readable report means the whole batch was taken.
        let body = response.text().await.unwrap_or_default();
        let report = match serde_json::from_str::<IngestResponse>(&body) {
            Ok(parsed) => DeliveryReport {
                inserted: parsed
                    .inserted
                    .unwrap_or(batch.len().saturating_sub(parsed.errors.len())),
                rejected: parsed.errors,
            },
            Err(_) => DeliveryReport {
                inserted: batch.len(),
                rejected: Vec::new(),
            },
        };

        Ok(report)
    }
}
