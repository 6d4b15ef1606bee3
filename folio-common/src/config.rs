//! Configuration loading and library folder resolution

use crate::{Error, Result};
use std::path::PathBuf;

/// Library folder resolution priority order:
/// 1. Environment variable (highest priority)
/// 2. TOML config file (`folio/config.toml` under the platform config dir)
/// 3. OS-dependent compiled default (fallback)
pub fn resolve_library_folder(env_var_name: &str) -> PathBuf {
    // Priority 1: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        return PathBuf::from(path);
    }

    // Priority 2: TOML config file
    if let Ok(config_path) = locate_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(folder) = config.get("library_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(folder);
                }
            }
        }
    }

    // Priority 3: OS-dependent compiled default
    default_library_folder()
}

/// Get the configuration file path for the platform
fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir()
        .map(|d| d.join("folio").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if user_config.exists() {
        return Ok(user_config);
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/folio/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config(format!(
        "Config file not found: {:?}",
        user_config
    )))
}

/// Get OS-dependent default library folder path
fn default_library_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("folio"))
        .unwrap_or_else(|| PathBuf::from("./folio_data"))
}

/// Ensure the library folder exists and return the database path inside it
pub fn prepare_library_folder(folder: &PathBuf) -> Result<PathBuf> {
    std::fs::create_dir_all(folder)?;
    Ok(folder.join("library.db"))
}
