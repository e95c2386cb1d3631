//! Centralized path resolution for hubstrap
//!
//! # Environment Variables
//!
//! - `HUBSTRAP_CONFIG_DIR` - Override config directory
//! - `HUBSTRAP_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For config_dir():
//! 1. `HUBSTRAP_CONFIG_DIR` environment variable
//! 2. `XDG_CONFIG_HOME/hubstrap` (if set)
//! 3. Platform default:
//!    - Windows: `%APPDATA%\hubstrap`
//!    - macOS/Linux: `~/.config/hubstrap`
//!
//! For state_dir():
//! 1. `HUBSTRAP_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/hubstrap` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\hubstrap`
//!    - macOS/Linux: `~/.local/state/hubstrap`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for config directory override
pub const ENV_CONFIG_DIR: &str = "HUBSTRAP_CONFIG_DIR";

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "HUBSTRAP_STATE_DIR";

const APP: &str = "hubstrap";

/// Get the hubstrap config directory path
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = expand(&dir);
        log::debug!("Using config dir from {}: {}", ENV_CONFIG_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        let path = PathBuf::from(xdg_config).join(APP);
        log::debug!("Using XDG_CONFIG_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(app_data) = dirs::config_dir() {
            return Ok(app_data.join(APP));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".config").join(APP);
    log::debug!("Using default config dir: {}", path.display());
    Ok(path)
}

/// Get the hubstrap state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join(APP);
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            return Ok(local_app_data.join(APP));
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join(APP);
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Default stack file: `<config_dir>/stack.toml`
pub fn default_config_file() -> Result<PathBuf> {
    Ok(config_dir()?.join("stack.toml"))
}

/// Default state file: `<state_dir>/state.json`
pub fn default_state_file() -> Result<PathBuf> {
    Ok(state_dir()?.join("state.json"))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
