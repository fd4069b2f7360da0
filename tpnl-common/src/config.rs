//! Configuration file resolution and TOML helpers
//!
//! Services resolve their settings with the priority order
//! CLI argument → environment variable → TOML config file → compiled default.
//! This module owns the platform-dependent config file location and the
//! generic TOML read/write plumbing; each service defines its own config
//! struct on top.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Default configuration file path for a service, e.g.
/// `~/.config/tpnl/tpnl-fd.toml` on Linux. `/etc/tpnl/<service>.toml` is
/// consulted as a system-wide fallback on Linux.
pub fn config_file_path(service_name: &str) -> Option<PathBuf> {
    let file_name = format!("{}.toml", service_name);

    if let Some(dir) = dirs::config_dir() {
        let user_config = dir.join("tpnl").join(&file_name);
        if user_config.exists() {
            return Some(user_config);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/tpnl").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Read and parse a TOML config file
pub fn read_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Serialize and write a TOML config file, creating parent directories
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

