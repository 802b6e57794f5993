//! Configuration management for portkeep

mod profile;
pub mod serde_utils;
mod settings;

pub use profile::{resolve_profile_path, Profile, ResolvedTarget, ServiceSpec, TargetSpec};
pub use settings::{DaemonSettings, Settings, SupervisorSettings, TeardownSettings};

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Environment variable overriding the state directory
pub const HOME_ENV: &str = "PORTKEEP_HOME";

/// Environment variable naming the default profile
pub const PROFILE_ENV: &str = "PORTKEEP_PROFILE";

/// Get the state directory holding the registry, locks, logs and config
///
/// `$PORTKEEP_HOME` wins; otherwise `~/.portkeep`.
pub fn default_state_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".portkeep")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_state_dir().join("config.toml")
}

/// Directory worker log files are written to
pub fn log_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("logs")
}

/// Log file for the worker serving (namespace, name)
pub fn worker_log_path(state_dir: &Path, namespace: &str, name: &str) -> PathBuf {
    let sanitize = |s: &str| {
        s.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect::<String>()
    };
    log_dir(state_dir).join(format!("{}_{}.log", sanitize(namespace), sanitize(name)))
}

/// Load configuration from a file
pub fn load_config<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: T = toml::from_str(&content)?;
    Ok(config)
}
