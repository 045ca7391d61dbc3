//! # burnrate-collector
//!
//! Scheduled polling of provider usage APIs.
//!
//! Every run re-reads the active credentials from the store, polls the
//! providers that expose an organization usage API (OpenAI, Anthropic) with
//! bounded concurrency, and stores the reported hourly buckets as usage
//! events. Providers without such an API are reported as `sdk_required`.

pub mod collector;
pub mod config;
pub mod error;
pub mod providers;
pub mod scheduler;

pub use collector::{PollCollector, PollRunReport, PollStatus, ProviderResult};
pub use config::CollectorConfig;
pub use error::{CollectorError, ProviderError, Result};
pub use providers::{
    AnthropicPoller, BucketUsage, OpenAiPoller, ProviderRegistry, SDK_ONLY_PROVIDERS, UsagePoller,
    is_sdk_only,
};
pub use scheduler::PollScheduler;
