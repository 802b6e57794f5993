//! pk-core: Core abstractions and configuration for portkeep
//!
//! This crate provides the tunnel record types, the on-disk connection
//! registry, process liveness probing, and the configuration/profile
//! structures shared by the supervisor and the CLI.

pub mod config;
pub mod error;
pub mod lock;
pub mod process;
pub mod registry;
pub mod types;

pub use error::{ConfigError, RegistryError};
pub use process::{LivenessProbe, OsProbe, ProcessState};
pub use registry::Registry;
pub use types::{TunnelKey, TunnelParams, TunnelRecord, TunnelStatus};
