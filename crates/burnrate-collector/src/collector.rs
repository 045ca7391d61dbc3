//! One poll run over every active credential.

use crate::config::CollectorConfig;
use crate::error::Result;
use crate::providers::{BucketUsage, ProviderRegistry, is_sdk_only};
use burnrate_cost::{Credential, PollError, UsageEvent, UsageStore, pricing};
use chrono::{DateTime, Duration, Utc};
use futures_util::StreamExt;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of polling one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    Success,
    Error,
    SdkRequired,
    UnknownProvider,
}

/// Per-credential entry in a run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider: String,
    pub status: PollStatus,

    /// Usage rows stored from this credential
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// How to fix a rejected key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// Summary of a poll run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollRunReport {
    pub success: bool,
    pub results: Vec<ProviderResult>,
    pub total_inserted: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PollRunReport {
    /// Results with a given status.
    pub fn with_status(&self, status: PollStatus) -> impl Iterator<Item = &ProviderResult> {
        self.results.iter().filter(move |r| r.status == status)
    }
}

/// Polls provider usage APIs and stores what they report.
pub struct PollCollector {
    store: Arc<dyn UsageStore>,
    registry: ProviderRegistry,
    config: CollectorConfig,
}

impl PollCollector {
    /// Create a collector with the built-in providers.
    pub fn new(store: Arc<dyn UsageStore>, config: CollectorConfig) -> Result<Self> {
        let registry = ProviderRegistry::from_config(&config)?;
        Ok(Self::with_registry(store, registry, config))
    }

    /// Create a collector with a custom provider registry.
    pub fn with_registry(
        store: Arc<dyn UsageStore>,
        registry: ProviderRegistry,
        config: CollectorConfig,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    /// Poll every active credential once.
    ///
    /// Only a failure to list credentials fails the run; provider failures
    /// are reported per credential.
    pub async fn run(&self) -> Result<PollRunReport> {
        let now = Utc::now();
        let credentials = self
            .with_store(|store| store.select_active_credentials())
            .await??;

        if credentials.is_empty() {
            info!("No active API keys to poll");
            return Ok(PollRunReport {
                success: true,
                results: Vec::new(),
                total_inserted: 0,
                timestamp: now,
                message: Some("No active API keys found".to_string()),
            });
        }

        info!(
            credentials = credentials.len(),
            concurrency = self.config.concurrency,
            "Starting poll run"
        );

        let outcomes: Vec<(ProviderResult, usize)> = stream::iter(credentials)
            .map(|credential| self.poll_credential(credential, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let total_inserted = outcomes.iter().map(|(_, inserted)| inserted).sum();
        let results = outcomes.into_iter().map(|(result, _)| result).collect();

        info!(total_inserted, "Poll run finished");
        Ok(PollRunReport {
            success: true,
            results,
            total_inserted,
            timestamp: now,
            message: None,
        })
    }

    async fn poll_credential(&self, credential: Credential, now: DateTime<Utc>) -> (ProviderResult, usize) {
        let provider = credential.provider.clone();

        if is_sdk_only(&provider) {
            debug!(provider = %provider, "Provider has no usage API");
            return (
                ProviderResult {
                    message: Some(format!(
                        "{provider} has no public usage API. Add the BurnRate tracker to your app to track {provider} usage automatically."
                    )),
                    ..result(&provider, PollStatus::SdkRequired)
                },
                0,
            );
        }

        let Some(poller) = self.registry.get(&provider) else {
            return (
                ProviderResult {
                    message: Some(format!("Provider \"{}\" is not supported yet.", provider)),
                    ..result(&provider, PollStatus::UnknownProvider)
                },
                0,
            );
        };

        let since = now - Duration::hours(self.config.window_hours);
        match poller
            .fetch_usage(&credential.encrypted_key, since, now)
            .await
        {
            Ok(buckets) => {
                // Only complete buckets not already covered by an earlier run.
                let mut fresh: Vec<BucketUsage> = buckets
                    .into_iter()
                    .filter(|b| {
                        b.bucket_end <= now
                            && credential.last_used.is_none_or(|seen| b.bucket_end > seen)
                            && (b.input_tokens > 0 || b.output_tokens > 0)
                    })
                    .collect();
                fresh.sort_by_key(|b| b.bucket_end);

                let credential_id = credential.id;
                match self
                    .with_store(move |store| store_buckets(store, &credential, &fresh, now))
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!(provider = %provider, credential_id, error = %e, "Storing polled usage failed");
                        (
                            ProviderResult {
                                message: Some(e.to_string()),
                                ..result(&provider, PollStatus::Error)
                            },
                            0,
                        )
                    }
                }
            }
            Err(e) => {
                warn!(
                    provider = %provider,
                    credential_id = credential.id,
                    error = %e,
                    "Provider poll failed"
                );
                let record = PollError::for_credential(&credential, e.to_string());
                match self.with_store(move |store| store.insert_poll_error(&record)).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(store_err)) => warn!(error = %store_err, "Failed to record poll error"),
                    Err(join_err) => warn!(error = %join_err, "Failed to record poll error"),
                }

                (
                    ProviderResult {
                        message: Some(e.to_string()),
                        hint: e.is_auth_error().then(|| poller.key_hint().to_string()),
                        ..result(&provider, PollStatus::Error)
                    },
                    0,
                )
            }
        }
    }

    /// Run a store call on the blocking pool.
    async fn with_store<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn UsageStore) -> T + Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(store.as_ref())).await?)
    }
}

/// Store the fresh buckets of one credential, oldest window first.
///
/// The cursor only moves past windows whose rows were all stored; the first
/// failed insert stops the credential and is reported as a poll error.
fn store_buckets(
    store: &dyn UsageStore,
    credential: &Credential,
    fresh: &[BucketUsage],
    now: DateTime<Utc>,
) -> (ProviderResult, usize) {
    let provider = credential.provider.as_str();
    let mut inserted = 0;
    let mut failed_at = None;

    for (index, bucket) in fresh.iter().enumerate() {
        let cost = pricing::cost(
            provider,
            &bucket.model,
            bucket.input_tokens,
            bucket.output_tokens,
        );
        let event = UsageEvent::new(
            &credential.owner_id,
            provider,
            &bucket.model,
            bucket.input_tokens,
            bucket.output_tokens,
            cost,
        )
        .at(bucket.bucket_start);

        match store.insert_usage_event(&event) {
            Ok(_) => inserted += 1,
            Err(e) => {
                warn!(
                    provider = %provider,
                    credential_id = credential.id,
                    error = %e,
                    "Failed to store polled usage"
                );
                failed_at = Some((index, e));
                break;
            }
        }
    }

    let cursor = match &failed_at {
        None => Some(now),
        Some((index, _)) => {
            let failed_end = fresh[*index].bucket_end;
            fresh[..*index]
                .iter()
                .rev()
                .map(|b| b.bucket_end)
                .find(|end| *end < failed_end)
        }
    };
    if let Some(cursor) = cursor
        && let Err(e) = store.update_credential_last_used(credential.id, cursor)
    {
        warn!(credential_id = credential.id, error = %e, "Failed to update last_used");
    }

    if let Some((_, e)) = failed_at {
        let message = format!(
            "Stored {} of {} usage rows ({}); the rest will be retried next run",
            inserted,
            fresh.len(),
            e
        );
        if let Err(store_err) =
            store.insert_poll_error(&PollError::for_credential(credential, message.clone()))
        {
            warn!(error = %store_err, "Failed to record poll error");
        }
        return (
            ProviderResult {
                entries: Some(inserted),
                message: Some(message),
                ..result(provider, PollStatus::Error)
            },
            inserted,
        );
    }

    info!(provider = %provider, credential_id = credential.id, inserted, "Polled provider usage");
    (
        ProviderResult {
            entries: Some(inserted),
            ..result(provider, PollStatus::Success)
        },
        inserted,
    )
}

fn result(provider: &str, status: PollStatus) -> ProviderResult {
    ProviderResult {
        provider: provider.to_string(),
        status,
        entries: None,
        message: None,
        hint: None,
    }
}
