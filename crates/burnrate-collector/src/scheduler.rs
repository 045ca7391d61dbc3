//! Background poll scheduler.
//!
//! ## Usage
//!
//! ```no_run
//! use burnrate_collector::{CollectorConfig, PollCollector, PollScheduler};
//! use burnrate_cost::UsageDatabase;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(UsageDatabase::open("usage.db")?);
//! let collector = Arc::new(PollCollector::new(store, CollectorConfig::default())?);
//!
//! // Polls every 15 minutes until aborted
//! let handle = PollScheduler::new(collector).start();
//! // ...
//! handle.abort();
//! # Ok(())
//! # }
//! ```

use crate::collector::{PollCollector, PollRunReport};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Runs the collector on a fixed interval.
pub struct PollScheduler {
    collector: Arc<PollCollector>,
    interval: Duration,
}

impl PollScheduler {
    /// Create a scheduler using the collector's configured interval.
    pub fn new(collector: Arc<PollCollector>) -> Self {
        let interval = collector.config().interval();
        Self {
            collector,
            interval,
        }
    }

    /// Create a scheduler with a custom interval.
    pub fn with_interval(collector: Arc<PollCollector>, interval: Duration) -> Self {
        Self {
            collector,
            interval,
        }
    }

    /// Start the background poll task.
    ///
    /// Returns a JoinHandle that can be used to abort the task.
    pub fn start(self) -> JoinHandle<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting poll scheduler"
        );

        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(&self) {
        // First tick fires immediately
        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;
            debug!("Running scheduled poll");

            match self.collector.run().await {
                Ok(report) => {
                    debug!(total_inserted = report.total_inserted, "Scheduled poll completed");
                }
                Err(e) => {
                    error!("Scheduled poll failed: {}", e);
                }
            }
        }
    }

    /// Run one poll now.
    pub async fn run_once(&self) -> Result<PollRunReport> {
        self.collector.run().await
    }

    /// Get the poll interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}
