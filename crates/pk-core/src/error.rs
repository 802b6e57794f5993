//! Core error types for portkeep

use std::path::PathBuf;
use thiserror::Error;

/// Connection registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Reading or writing the registry file failed
    #[error("Registry I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The registry file exists but is not a valid record list
    #[error("Failed to parse registry {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Records could not be serialized
    #[error("Failed to serialize registry: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The advisory file lock could not be taken
    #[error("Failed to lock {path:?}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No record for the given key
    #[error("Connection not found: {scope}/{name}")]
    NotFound { name: String, scope: String },

    /// An active record already exists for the given key
    #[error("Active connection already recorded for {scope}/{name} (PID {pid})")]
    Duplicate {
        name: String,
        scope: String,
        pid: u32,
    },
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// No profile could be located
    #[error("Profile not found. Use --profile or set PORTKEEP_PROFILE")]
    ProfileNotFound,

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Service not present in the profile
    #[error("Service {namespace}/{name} not found in profile")]
    ServiceNotFound { name: String, namespace: String },

    /// Service has nothing to forward to
    #[error("Service {namespace}/{name} has no targets")]
    NoTargets { name: String, namespace: String },

    /// Named target not present under the service
    #[error("Target {target} not found for service {namespace}/{name}")]
    TargetNotFound {
        name: String,
        namespace: String,
        target: String,
    },
}
