//! Configuration file loading.
//!
//! Component configs live next to the components that use them; this module
//! only knows how to find and parse a YAML file into any of them.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{BurnrateError, Result};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "BURNRATE_CONFIG";

/// Get the BurnRate home directory (`~/.burnrate`).
pub fn burnrate_home() -> Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| BurnrateError::Internal {
        message: "HOME environment variable not set".into(),
    })?;

    Ok(PathBuf::from(home).join(".burnrate"))
}

/// Get the default config file path.
///
/// Honors `BURNRATE_CONFIG`, otherwise `~/.burnrate/config.yaml`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }
    Ok(burnrate_home()?.join("config.yaml"))
}

/// Load and deserialize a YAML file.
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BurnrateError::config_not_found_with_source(path, e))?;

    let parsed = parse_yaml(&content).map_err(|message| BurnrateError::ConfigInvalid {
        path: path.to_path_buf(),
        message,
    })?;

    debug!(path = %path.display(), "configuration loaded");
    Ok(parsed)
}

/// Deserialize a YAML document, returning the parser message on failure.
pub fn parse_yaml<T: DeserializeOwned>(content: &str) -> std::result::Result<T, String> {
    serde_yaml::from_str(content).map_err(|e| e.to_string())
}
