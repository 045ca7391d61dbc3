//! # burnrate-core
//!
//! Core errors, logging and configuration loading shared by the BurnRate crates.
//!
//! This crate provides:
//! - [`BurnrateError`] - Startup and configuration errors
//! - [`logging`] - Tracing setup for the service and tests
//! - [`config`] - YAML configuration file loading
//!
//! ## Example
//!
//! ```no_run
//! use burnrate_core::{config, logging};
//!
//! fn main() -> burnrate_core::Result<()> {
//!     let _guard = logging::init_logging(None, false)?;
//!
//!     let path = config::default_config_path()?;
//!     let raw: serde_yaml::Value = config::load_yaml(&path)?;
//!     tracing::info!(?raw, "loaded configuration");
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use error::{BurnrateError, Result};
pub use logging::{LogGuard, init_logging};
