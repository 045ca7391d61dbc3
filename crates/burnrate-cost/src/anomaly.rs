//! Spend anomaly detection.
//!
//! Short-window spend is compared against the trailing 24-hour baseline.
//! Alerts are transient: every evaluation produces a fresh set that replaces
//! the previous one on the [`AlertBoard`].

use crate::models::UsageEvent;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Kind of anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Hourly spend well above baseline
    Spike,
    /// Hourly spend so far above baseline (or absolute ceiling) that a leaked key is likely
    LeakSuspected,
    /// Large spend inside five minutes
    RapidBurst,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// A detected anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub action: String,
    pub detected_at: DateTime<Utc>,
}

/// Detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Hourly spend above `spike_multiplier × baseline` raises a spike warning (default: 3)
    pub spike_multiplier: f64,

    /// Hourly spend above `leak_multiplier × baseline` suggests a leak (default: 5)
    pub leak_multiplier: f64,

    /// Hourly spend above this amount suggests a leak regardless of baseline (default: 50)
    pub hourly_ceiling: f64,

    /// Spend in five minutes above this amount is a rapid burst (default: 10)
    pub burst_threshold: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            spike_multiplier: 3.0,
            leak_multiplier: 5.0,
            hourly_ceiling: 50.0,
            burst_threshold: 10.0,
        }
    }
}

impl AnomalyConfig {
    /// Create a configuration with default thresholds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the spike multiplier.
    pub fn with_spike_multiplier(mut self, multiplier: f64) -> Self {
        self.spike_multiplier = multiplier.max(1.0);
        self
    }

    /// Set the leak multiplier.
    pub fn with_leak_multiplier(mut self, multiplier: f64) -> Self {
        self.leak_multiplier = multiplier.max(1.0);
        self
    }

    /// Set the absolute hourly ceiling.
    pub fn with_hourly_ceiling(mut self, ceiling: f64) -> Self {
        self.hourly_ceiling = ceiling.max(0.0);
        self
    }

    /// Set the five-minute burst threshold.
    pub fn with_burst_threshold(mut self, threshold: f64) -> Self {
        self.burst_threshold = threshold.max(0.0);
        self
    }
}

/// Spend totals over the trailing windows used for detection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendWindows {
    pub last_5_minutes: f64,
    pub last_hour: f64,
    pub last_24_hours: f64,
    /// `last_24_hours / 24`
    pub baseline_hourly: f64,
}

impl SpendWindows {
    /// Sum event costs into windows `(now - d, now]`.
    ///
    /// Events after `now` are ignored.
    pub fn from_events(events: &[UsageEvent], now: DateTime<Utc>) -> Self {
        let five_minutes_ago = now - Duration::minutes(5);
        let hour_ago = now - Duration::hours(1);
        let day_ago = now - Duration::hours(24);

        let mut windows = Self::default();
        for event in events.iter().filter(|e| e.timestamp <= now) {
            if event.timestamp > day_ago {
                windows.last_24_hours += event.cost;
            }
            if event.timestamp > hour_ago {
                windows.last_hour += event.cost;
            }
            if event.timestamp > five_minutes_ago {
                windows.last_5_minutes += event.cost;
            }
        }
        windows.baseline_hourly = windows.last_24_hours / 24.0;
        windows
    }
}

/// Evaluates spend windows against the configured thresholds.
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Evaluate an owner's recent events.
    pub fn evaluate(&self, events: &[UsageEvent], now: DateTime<Utc>) -> Vec<Alert> {
        self.evaluate_windows(&SpendWindows::from_events(events, now), now)
    }

    /// Evaluate precomputed windows.
    pub fn evaluate_windows(&self, windows: &SpendWindows, now: DateTime<Utc>) -> Vec<Alert> {
        let cfg = &self.config;
        let baseline = windows.baseline_hourly;
        let mut alerts = Vec::new();

        if baseline > 0.0 && windows.last_hour > cfg.spike_multiplier * baseline {
            alerts.push(Alert {
                kind: AlertKind::Spike,
                severity: AlertSeverity::Warning,
                message: format!(
                    "Spend in the last hour (${:.2}) is {:.1}x the hourly baseline (${:.2})",
                    windows.last_hour,
                    windows.last_hour / baseline,
                    baseline
                ),
                action: "Review recent calls for unexpected traffic or retries".to_string(),
                detected_at: now,
            });
        }

        let over_multiple = baseline > 0.0 && windows.last_hour > cfg.leak_multiplier * baseline;
        let over_ceiling = windows.last_hour > cfg.hourly_ceiling;
        if over_multiple || over_ceiling {
            let reason = if over_ceiling {
                format!("exceeds the ${:.2} hourly ceiling", cfg.hourly_ceiling)
            } else {
                format!(
                    "is more than {:.0}x the hourly baseline (${:.2})",
                    cfg.leak_multiplier, baseline
                )
            };
            alerts.push(Alert {
                kind: AlertKind::LeakSuspected,
                severity: AlertSeverity::Critical,
                message: format!(
                    "Possible leaked API key: ${:.2} spent in the last hour {}",
                    windows.last_hour, reason
                ),
                action: "Rotate the affected API keys and check where they are used".to_string(),
                detected_at: now,
            });
        }

        if windows.last_5_minutes > cfg.burst_threshold {
            alerts.push(Alert {
                kind: AlertKind::RapidBurst,
                severity: AlertSeverity::Critical,
                message: format!(
                    "${:.2} spent in the last 5 minutes (threshold ${:.2})",
                    windows.last_5_minutes, cfg.burst_threshold
                ),
                action: "Look for runaway loops or batch jobs and pause them".to_string(),
                detected_at: now,
            });
        }

        alerts
    }
}

/// Current alert set per owner.
#[derive(Debug, Default)]
pub struct AlertBoard {
    alerts: RwLock<HashMap<String, Vec<Alert>>>,
}

impl AlertBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole board with the result of one evaluation cycle.
    ///
    /// Owners absent from `alerts` end up with no alerts.
    pub fn replace_all(&self, alerts: HashMap<String, Vec<Alert>>) {
        let mut board = self.alerts.write().unwrap_or_else(|e| e.into_inner());
        *board = alerts;
    }

    /// Replace one owner's alerts.
    pub fn replace(&self, owner_id: &str, alerts: Vec<Alert>) {
        let mut board = self.alerts.write().unwrap_or_else(|e| e.into_inner());
        if alerts.is_empty() {
            board.remove(owner_id);
        } else {
            board.insert(owner_id.to_string(), alerts);
        }
    }

    /// Current alerts for an owner.
    pub fn current(&self, owner_id: &str) -> Vec<Alert> {
        self.alerts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(owner_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of alerts on the board.
    pub fn len(&self) -> usize {
        self.alerts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
