use burnrate_collector::PollCollector;
use burnrate_core::BurnrateError;
use burnrate_cost::{AlertBoard, AnomalyDetector, Recommender, UsageDatabase, UsageStore};
use std::sync::Arc;
use tracing::info;

use crate::config::BurnrateConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BurnrateConfig>,
    pub store: Arc<dyn UsageStore>,
    pub collector: Arc<PollCollector>,
    pub alerts: Arc<AlertBoard>,
    pub detector: Arc<AnomalyDetector>,
    pub recommender: Arc<Recommender>,
    pub version: &'static str,
}

impl AppState {
    /// Open the configured database and build every component.
    pub fn new(config: BurnrateConfig) -> Result<Self> {
        config.validate()?;
        let path = config.database_path()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| BurnrateError::DirectoryCreation {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        info!(path = %path.display(), "Opening usage database");
        let store = Arc::new(UsageDatabase::open(path)?);
        Self::with_store(config, store)
    }

    /// Build the state over an existing store.
    pub fn with_store(config: BurnrateConfig, store: Arc<dyn UsageStore>) -> Result<Self> {
        let collector = Arc::new(PollCollector::new(store.clone(), config.collector.clone())?);
        let detector = Arc::new(AnomalyDetector::new(config.anomaly.clone()));
        let recommender = Arc::new(Recommender::new(config.optimizer.clone()));

        Ok(Self {
            config: Arc::new(config),
            store,
            collector,
            alerts: Arc::new(AlertBoard::new()),
            detector,
            recommender,
            version: env!("CARGO_PKG_VERSION"),
        })
    }
}
