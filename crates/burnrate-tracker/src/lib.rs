//! # burnrate-tracker
//!
//! Client-side usage tracking for AI provider calls.
//!
//! Wrap each provider call with [`UsageTracker::track`]. Token counts are
//! pulled from the response, priced with the shared rate table and queued;
//! the queue is flushed in the background to the ingestion endpoint.
//!
//! ## Example
//!
//! ```no_run
//! use burnrate_tracker::{TrackerConfig, UsageTracker};
//!
//! # async fn call_openai() -> Result<serde_json::Value, std::io::Error> { unimplemented!() }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let tracker = UsageTracker::new(TrackerConfig::new(
//!     "http://127.0.0.1:8787/api/v1/track-usage",
//!     std::env::var("BURNRATE_API_KEY")?,
//!     "team-a",
//! ))?;
//! tracker.start();
//!
//! let response = tracker.track_openai("gpt-4o", || call_openai()).await?;
//!
//! tracker.stop().await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
pub mod config;
pub mod error;
pub mod extract;
pub mod sink;
pub mod tracker;

pub use config::TrackerConfig;
pub use error::{Result, TrackerError};
pub use extract::{ExtractionRule, TokenCounts};
pub use sink::{DeliveryReport, HttpSink, RejectedEntry, UsageSink};
pub use tracker::{FlushOutcome, UsageTracker};
