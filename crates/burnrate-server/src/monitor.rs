//! Periodic anomaly evaluation.
//!
//! Every cycle re-evaluates each owner with recent usage and replaces the
//! whole alert board with the result. Alerts are not deduplicated or
//! acknowledged; an owner whose spend calms down simply drops off the board.

use burnrate_cost::{
    Alert, AlertBoard, AlertSeverity, AnomalyDetector, Result, UsageQuery, UsageStore,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::state::AppState;

/// Re-evaluates alerts on a fixed interval.
#[derive(Clone)]
pub struct AlertMonitor {
    store: Arc<dyn UsageStore>,
    detector: Arc<AnomalyDetector>,
    board: Arc<AlertBoard>,
    interval: std::time::Duration,
    active_window_hours: i64,
}

impl AlertMonitor {
    /// Create a monitor sharing the service's store, detector and board.
    pub fn new(state: &AppState) -> Self {
        Self {
            store: state.store.clone(),
            detector: state.detector.clone(),
            board: state.alerts.clone(),
            interval: state.config.alerts.evaluation_interval(),
            active_window_hours: state.config.alerts.active_window_hours,
        }
    }

    pub fn with_interval(mut self, interval: std::time::Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the background evaluation task.
    pub fn start(self) -> JoinHandle<()> {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting alert monitor"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            loop {
                interval.tick().await;
                let monitor = self.clone();
                match tokio::task::spawn_blocking(move || monitor.run_once(Utc::now())).await {
                    Ok(Ok(total)) => debug!(alerts = total, "Alert evaluation finished"),
                    Ok(Err(e)) => error!("Alert evaluation failed: {}", e),
                    Err(e) => error!("Alert evaluation task failed: {}", e),
                }
            }
        })
    }

    /// Evaluate every active owner and replace the board.
    ///
    /// An owner whose usage cannot be read keeps the alerts of the previous
    /// cycle. Returns the number of alerts now on the board.
    pub fn run_once(&self, now: DateTime<Utc>) -> Result<usize> {
        let owners = UsageQuery::new(self.store.as_ref()).active_owners(self.active_window_hours, now)?;
        debug!(owners = owners.len(), "Evaluating spend anomalies");

        let mut board = HashMap::new();
        for owner in owners {
            let alerts = match self.evaluate_owner(&owner, now) {
                Ok(alerts) => alerts,
                Err(e) => {
                    warn!(owner = %owner, error = %e, "Skipping owner in alert evaluation");
                    self.board.current(&owner)
                }
            };
            if !alerts.is_empty() {
                board.insert(owner, alerts);
            }
        }

        let total = board.values().map(Vec::len).sum();
        self.board.replace_all(board);
        Ok(total)
    }

    /// Evaluate one owner without touching the board.
    pub fn evaluate_owner(&self, owner_id: &str, now: DateTime<Utc>) -> Result<Vec<Alert>> {
        let events = self
            .store
            .usage_events_between(owner_id, now - Duration::hours(24), now)?;
        let alerts = self.detector.evaluate(&events, now);

        for alert in &alerts {
            match alert.severity {
                AlertSeverity::Critical => warn!(
                    owner = %owner_id,
                    kind = ?alert.kind,
                    message = %alert.message,
                    "Critical spend anomaly"
                ),
                AlertSeverity::Warning => info!(
                    owner = %owner_id,
                    kind = ?alert.kind,
                    message = %alert.message,
                    "Spend anomaly"
                ),
            }
        }

        Ok(alerts)
    }
}
