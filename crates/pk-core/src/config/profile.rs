//! Cluster profiles and target discovery
//!
//! A profile is the credential reference a tunnel is started with: a TOML
//! file describing the services of a cluster, grouped by namespace, and the
//! concrete targets behind each of them. Workers reload the profile from
//! its path, so the path alone is enough to re-establish a tunnel.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{load_config, PROFILE_ENV};
use crate::error::ConfigError;

/// Remote port used when neither the caller nor the service names one
pub const FALLBACK_REMOTE_PORT: u16 = 3306;

/// A cluster profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub cluster: ClusterInfo,
    pub services: Vec<ServiceSpec>,
}

/// Descriptive cluster metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterInfo {
    pub name: String,
}

/// A service that can be tunnelled to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Ports exposed by the service; the first is the default remote port
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Concrete endpoints behind the service; the first is preferred
    #[serde(default)]
    pub targets: Vec<TargetSpec>,
}

/// One endpoint behind a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub name: String,
    /// Host name or IP address to dial
    pub address: String,
}

/// Outcome of resolving a service name for a new tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub service: String,
    pub namespace: String,
    pub target: String,
    pub address: String,
    pub local_port: String,
    pub remote_port: u16,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl Profile {
    /// Load a profile from disk
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        load_config(path)
    }

    /// Services in a namespace, in file order
    pub fn services_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a ServiceSpec> {
        self.services.iter().filter(move |s| s.namespace == namespace)
    }

    /// Look up a service by (name, namespace)
    pub fn service(&self, name: &str, namespace: &str) -> Result<&ServiceSpec, ConfigError> {
        self.services
            .iter()
            .find(|s| s.name == name && s.namespace == namespace)
            .ok_or_else(|| ConfigError::ServiceNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    /// Resolve a service to a concrete target and port pair
    ///
    /// Remote port: `remote_port`, else the first service port, else 3306.
    /// Local port: `local_port`, else remote port + 1.
    pub fn resolve(
        &self,
        name: &str,
        namespace: &str,
        local_port: Option<&str>,
        remote_port: Option<u16>,
    ) -> Result<ResolvedTarget, ConfigError> {
        let service = self.service(name, namespace)?;
        let target = service
            .targets
            .first()
            .ok_or_else(|| ConfigError::NoTargets {
                name: name.to_string(),
                namespace: namespace.to_string(),
            })?;

        let remote_port = remote_port
            .or_else(|| service.ports.first().copied())
            .unwrap_or(FALLBACK_REMOTE_PORT);

        let local_port = match local_port.filter(|p| !p.is_empty()) {
            Some(port) => port.to_string(),
            None => remote_port
                .checked_add(1)
                .ok_or_else(|| {
                    ConfigError::Invalid(format!(
                        "No default local port for remote port {}; pass one explicitly",
                        remote_port
                    ))
                })?
                .to_string(),
        };

        Ok(ResolvedTarget {
            service: service.name.clone(),
            namespace: service.namespace.clone(),
            target: target.name.clone(),
            address: target.address.clone(),
            local_port,
            remote_port,
        })
    }

    /// Address of a named target behind a service
    pub fn target_address(
        &self,
        name: &str,
        namespace: &str,
        target: &str,
    ) -> Result<&str, ConfigError> {
        self.service(name, namespace)?
            .targets
            .iter()
            .find(|t| t.name == target)
            .map(|t| t.address.as_str())
            .ok_or_else(|| ConfigError::TargetNotFound {
                name: name.to_string(),
                namespace: namespace.to_string(),
                target: target.to_string(),
            })
    }
}

/// Locate the profile to use
///
/// Priority: explicit path > `$PORTKEEP_PROFILE` > `<state_dir>/profile.toml`.
/// Candidates that do not exist are skipped.
pub fn resolve_profile_path(explicit: Option<&Path>, state_dir: &Path) -> Result<PathBuf, ConfigError> {
    let from_env = std::env::var_os(PROFILE_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from);

    explicit
        .map(Path::to_path_buf)
        .into_iter()
        .chain(from_env)
        .chain(std::iter::once(state_dir.join("profile.toml")))
        .find(|candidate| candidate.is_file())
        .ok_or(ConfigError::ProfileNotFound)
}
