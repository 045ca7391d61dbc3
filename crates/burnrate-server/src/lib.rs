//! # burnrate-server
//!
//! The BurnRate HTTP service: usage ingestion, on-demand provider polling,
//! spend statistics, current anomaly alerts and savings recommendations.
//!
//! [`serve`] opens the store, starts the poll scheduler and alert monitor in
//! the background, and serves the router until Ctrl-C.
//!
//! ## Routes
//!
//! | Method | Path | |
//! |---|---|---|
//! | GET | `/api/v1/health` | `{status, version}` |
//! | POST | `/api/v1/track-usage` | ingest `{metrics: [...]}` or one event |
//! | POST | `/api/v1/poll` | run the poll collector once |
//! | GET | `/api/v1/stats?user_id=` | usage stats, burn rate, budget status |
//! | GET | `/api/v1/alerts?user_id=` | current alerts |
//! | GET | `/api/v1/recommendations?user_id=` | ranked savings suggestions |

pub mod config;
pub mod error;
pub mod ingest;
pub mod monitor;
pub mod router;
pub mod routes;
pub mod state;

pub use config::BurnrateConfig;
pub use error::{ApiError, ApiErrorResponse, Result, ServerError};
pub use ingest::{IngestError, IngestResponse, ingest};
pub use monitor::AlertMonitor;
pub use router::build_router;
pub use state::AppState;

use burnrate_collector::PollScheduler;
use tracing::info;

/// Run the service until Ctrl-C.
pub async fn serve(config: BurnrateConfig) -> Result<()> {
    let address = config.bind_address()?;
    let state = AppState::new(config)?;

    let poller = PollScheduler::new(state.collector.clone()).start();
    let monitor = AlertMonitor::new(&state).start();

    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })?;
    info!(address = %address, version = state.version, "BurnRate listening");

    let served = axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    poller.abort();
    monitor.abort();
    info!("BurnRate stopped");

    served.map_err(ServerError::from)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
