//! BurnRate - AI API spend metering
//!
//! Runs the ingestion service or answers one-off questions about spend from
//! the command line.
//!
//! ## Usage
//!
//! ```bash
//! # Run the HTTP service (ingestion, polling, alerts)
//! burnrate serve
//!
//! # Poll provider usage APIs once
//! burnrate poll
//!
//! # Spend for one owner
//! burnrate stats --owner team-a --days 7
//! burnrate alerts --owner team-a
//! burnrate recommend --owner team-a
//!
//! # Custom config and verbose logging
//! burnrate --config ./burnrate.yaml -v serve
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use burnrate_collector::PollCollector;
use burnrate_core::{BurnrateError, LogGuard, init_logging};
use burnrate_cost::{
    AnomalyDetector, ProjectedCost, RecommendationInput, Recommender, UsageDatabase, UsageQuery,
    UsageStore,
};
use burnrate_server::BurnrateConfig;
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

/// BurnRate spend metering and anomaly alerts
#[derive(Parser, Debug)]
#[command(name = "burnrate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to $BURNRATE_CONFIG or ~/.burnrate/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (increases log level)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory for log files (defaults to ~/.burnrate/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service
    Serve,

    /// Poll every active credential once and print the run report
    Poll,

    /// Print usage stats, burn rate and budget status for an owner
    Stats {
        #[arg(long)]
        owner: String,

        /// Days of history
        #[arg(long, default_value_t = 30)]
        days: i64,
    },

    /// Evaluate and print current spend anomalies for an owner
    Alerts {
        #[arg(long)]
        owner: String,
    },

    /// Print ranked savings recommendations for an owner
    Recommend {
        #[arg(long)]
        owner: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("burnrate failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            if let Some(hint) = e
                .downcast_ref::<BurnrateError>()
                .and_then(BurnrateError::guidance)
            {
                eprintln!("Hint: {}", hint);
            }
            ExitCode::from(1)
        }
    }
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> burnrate_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), cli.verbose > 0)
}

fn load_config(cli: &Cli) -> Result<BurnrateConfig> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => burnrate_core::config::default_config_path()?,
    };
    Ok(BurnrateConfig::load(&path)?)
}

fn open_store(config: &BurnrateConfig) -> Result<Arc<UsageDatabase>> {
    let path = config.database_path()?;
    let db = UsageDatabase::open(path)
        .with_context(|| format!("opening usage database {}", path.display()))?;
    Ok(Arc::new(db))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Command::Serve => {
            info!("Starting BurnRate service");
            burnrate_server::serve(config).await?;
        }
        Command::Poll => {
            let store = open_store(&config)?;
            let collector = PollCollector::new(store, config.collector.clone())?;
            print_json(&collector.run().await?)?;
        }
        Command::Stats { owner, days } => {
            let store = open_store(&config)?;
            let usage = UsageQuery::new(store.as_ref());
            let now = Utc::now();

            let budget = usage.budget_status(&owner, config.budgets.budget_for(&owner), now)?;
            print_json(&serde_json::json!({
                "stats": usage.usage_stats_last_days(&owner, days, now)?,
                "burn_rate": usage.burn_rate(&owner, now)?,
                "projection": ProjectedCost::for_month(budget.month_to_date, now),
                "budget": budget,
            }))?;
        }
        Command::Alerts { owner } => {
            let store = open_store(&config)?;
            let now = Utc::now();
            let events = store.usage_events_between(&owner, now - Duration::hours(24), now)?;
            let alerts = AnomalyDetector::new(config.anomaly.clone()).evaluate(&events, now);
            print_json(&alerts)?;
        }
        Command::Recommend { owner } => {
            let store = open_store(&config)?;
            let usage = UsageQuery::new(store.as_ref());
            let recommender = Recommender::new(config.optimizer.clone());
            let now = Utc::now();

            let stats = usage.usage_stats_last_days(&owner, recommender.config().lookback_days, now)?;
            let recommendations = recommender.recommend(&RecommendationInput {
                stats: &stats,
                month_to_date: usage.month_to_date(&owner, now)?,
                monthly_budget: config.budgets.budget_for(&owner),
                now,
            });
            print_json(&recommendations)?;
        }
    }

    Ok(())
}
