//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle status of a recorded tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    /// Worker is believed to be running
    Active,
    /// Worker exited or was found dead
    Stopped,
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelStatus::Active => write!(f, "active"),
            TunnelStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Identity of a tunnel: a name unique within a scope (namespace)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelKey {
    pub name: String,
    pub scope: String,
}

impl TunnelKey {
    /// Create a new key
    pub fn new(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for TunnelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.name)
    }
}

/// Everything a worker needs to re-establish a tunnel in a fresh process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelParams {
    /// Service name the tunnel is registered under
    pub name: String,
    /// Namespace (scope) of the service
    pub namespace: String,
    /// Concrete target behind the service (e.g. a pod)
    pub target: String,
    /// Local side of the forward; kept as text so `addr:port` forms survive
    pub local_port: String,
    /// Port on the target
    pub remote_port: u16,
    /// Cluster profile used to resolve the target address
    pub profile: PathBuf,
}

impl TunnelParams {
    pub fn key(&self) -> TunnelKey {
        TunnelKey::new(&self.name, &self.namespace)
    }
}

/// One registry entry for an active or recently active tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRecord {
    /// OS process ID of the worker
    pub pid: u32,
    pub name: String,
    pub namespace: String,
    pub local_port: String,
    pub remote_port: u16,
    pub target: String,
    /// Path of the cluster profile the worker was started with
    pub profile: PathBuf,
    pub status: TunnelStatus,
    /// Unix timestamp (seconds) the record was committed
    #[serde(default)]
    pub started_at: u64,
}

impl TunnelRecord {
    /// Build an active record for a freshly confirmed worker
    pub fn active(pid: u32, params: &TunnelParams) -> Self {
        Self {
            pid,
            name: params.name.clone(),
            namespace: params.namespace.clone(),
            local_port: params.local_port.clone(),
            remote_port: params.remote_port,
            target: params.target.clone(),
            profile: params.profile.clone(),
            status: TunnelStatus::Active,
            started_at: current_time_secs(),
        }
    }

    /// Whether this record belongs to the given (name, scope)
    pub fn matches(&self, name: &str, scope: &str) -> bool {
        self.name == name && self.namespace == scope
    }

    pub fn is_active(&self) -> bool {
        self.status == TunnelStatus::Active
    }

    pub fn key(&self) -> TunnelKey {
        TunnelKey::new(&self.name, &self.namespace)
    }
}

/// Get the current Unix timestamp in seconds.
///
/// Returns 0 if the system clock is before the Unix epoch.
pub fn current_time_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
