//! Services command implementation

use std::path::Path;

use anyhow::{Context, Result};

use pk_core::config::{resolve_profile_path, Profile};

use crate::output::format_services;

/// List the services a profile defines in `namespace`
pub fn services_command(state_dir: &Path, namespace: &str, profile: Option<&Path>) -> Result<()> {
    let profile_path = resolve_profile_path(profile, state_dir)?;
    let profile = Profile::load(&profile_path)
        .with_context(|| format!("Failed to load profile {:?}", profile_path))?;

    if !profile.cluster.name.is_empty() {
        println!("Cluster: {}", profile.cluster.name);
    }

    let services: Vec<_> = profile.services_in(namespace).collect();
    if services.is_empty() {
        println!("No services in namespace {}", namespace);
        return Ok(());
    }

    println!("{}", format_services(services));
    Ok(())
}
