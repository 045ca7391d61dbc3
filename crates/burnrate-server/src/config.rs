//! Service configuration (`~/.burnrate/config.yaml`).
//!
//! ```yaml
//! storage:
//!   database_path: /var/lib/burnrate/usage.db
//! server:
//!   bind_address: 0.0.0.0:8787
//! budgets:
//!   default_monthly: 200
//!   owners:
//!     team-a: 500
//! collector:
//!   interval_secs: 900
//! alerts:
//!   evaluation_interval_secs: 60
//! ```
//!
//! Every section except `storage` has defaults.

use burnrate_collector::CollectorConfig;
use burnrate_core::{BurnrateError, Result};
use burnrate_cost::{AnomalyConfig, OptimizerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8787";

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BurnrateConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub budgets: BudgetConfig,

    #[serde(default)]
    pub collector: CollectorConfig,

    #[serde(default)]
    pub anomaly: AnomalyConfig,

    #[serde(default)]
    pub optimizer: OptimizerConfig,

    #[serde(default)]
    pub alerts: AlertsConfig,
}

/// Where usage is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file (required)
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Monthly budgets used for budget status and burn-rate recommendations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub default_monthly: f64,

    /// Per-owner overrides
    pub owners: HashMap<String, f64>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            default_monthly: 200.0,
            owners: HashMap::new(),
        }
    }
}

impl BudgetConfig {
    /// Monthly budget for an owner.
    pub fn budget_for(&self, owner_id: &str) -> f64 {
        self.owners
            .get(owner_id)
            .copied()
            .unwrap_or(self.default_monthly)
    }
}

/// Alert monitor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Seconds between evaluation cycles (default: 60)
    pub evaluation_interval_secs: u64,

    /// Owners with usage in this many trailing hours are evaluated (default: 24)
    pub active_window_hours: i64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_secs: 60,
            active_window_hours: 24,
        }
    }
}

impl AlertsConfig {
    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs)
    }
}

impl BurnrateConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = burnrate_core::config::load_yaml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration using a given database file and defaults elsewhere.
    pub fn with_database_path(path: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                database_path: Some(path.into()),
            },
            ..Default::default()
        }
    }

    /// Set the listen address.
    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.server.bind_address = address.into();
        self
    }

    /// Set the collector section.
    pub fn with_collector(mut self, collector: CollectorConfig) -> Self {
        self.collector = collector;
        self
    }

    /// Set the default monthly budget.
    pub fn with_default_budget(mut self, budget: f64) -> Self {
        self.budgets.default_monthly = budget;
        self
    }

    /// The configured database path.
    pub fn database_path(&self) -> Result<&Path> {
        match self.storage.database_path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => Ok(path),
            _ => Err(BurnrateError::missing_field("storage.database_path")),
        }
    }

    /// Parsed listen address.
    pub fn bind_address(&self) -> Result<SocketAddr> {
        self.server.bind_address.parse().map_err(|_| {
            BurnrateError::validation(format!(
                "server.bind_address '{}' is not a valid socket address",
                self.server.bind_address
            ))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Check required fields and value ranges.
    pub fn validate(&self) -> Result<()> {
        self.database_path()?;
        self.bind_address()?;

        if self.server.request_timeout_secs == 0 {
            return Err(BurnrateError::validation(
                "server.request_timeout_secs must be greater than zero",
            ));
        }
        if !(self.budgets.default_monthly.is_finite() && self.budgets.default_monthly >= 0.0) {
            return Err(BurnrateError::validation(
                "budgets.default_monthly must be a non-negative number",
            ));
        }
        if let Some((owner, _)) = self
            .budgets
            .owners
            .iter()
            .find(|(_, budget)| !(budget.is_finite() && **budget >= 0.0))
        {
            return Err(BurnrateError::validation(format!(
                "budget for owner '{}' must be a non-negative number",
                owner
            )));
        }
        if self.collector.interval_secs == 0 || self.collector.timeout_secs == 0 {
            return Err(BurnrateError::validation(
                "collector.interval_secs and collector.timeout_secs must be greater than zero",
            ));
        }
        if self.collector.concurrency == 0 {
            return Err(BurnrateError::validation(
                "collector.concurrency must be at least 1",
            ));
        }
        if self.alerts.evaluation_interval_secs == 0 {
            return Err(BurnrateError::validation(
                "alerts.evaluation_interval_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}
