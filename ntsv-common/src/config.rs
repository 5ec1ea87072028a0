//! Configuration file discovery
//!
//! Resolution order:
//! 1. Explicit path (command line)
//! 2. Environment variable
//! 3. `~/.config/<app>/config.toml`
//! 4. `/etc/<app>/config.toml`
//!
//! When nothing is found the caller runs on compiled defaults.

use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Locate the configuration file for `app`
///
/// Explicit and environment-provided paths must exist; the well-known
/// locations are probed silently.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    app: &str,
) -> Result<Option<PathBuf>> {
    if let Some(path) = cli_arg {
        return require_existing(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return require_existing(PathBuf::from(path));
        }
    }

    Ok(default_config_locations(app).into_iter().find(|p| p.exists()))
}

/// Well-known configuration locations for `app`, highest priority first
pub fn default_config_locations(app: &str) -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join(app).join("config.toml"));
    }
    locations.push(PathBuf::from("/etc").join(app).join("config.toml"));
    locations
}

/// Default directory for locally generated data (decoded tones)
pub fn default_data_dir(app: &str) -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(app)
}

/// Read and parse a TOML file
pub fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Loading configuration from {}", path.display());
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

fn require_existing(path: PathBuf) -> Result<Option<PathBuf>> {
    if path.exists() {
        Ok(Some(path))
    } else {
        Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )))
    }
}
