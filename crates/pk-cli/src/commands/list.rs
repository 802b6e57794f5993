//! List command implementation

use std::path::Path;

use anyhow::{Context, Result};

use pk_core::{OsProbe, Registry};

use crate::output::format_tunnels;

/// Reconcile the registry against the process table and print it
pub fn list_command(state_dir: &Path, all: bool, json: bool) -> Result<()> {
    let registry = Registry::in_dir(state_dir);
    let records = registry
        .reconcile(&OsProbe)
        .with_context(|| format!("Failed to read registry {:?}", registry.path()))?;

    let records: Vec<_> = records
        .into_iter()
        .filter(|r| all || r.is_active())
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        println!("{}", format_tunnels(&records));
    }
    Ok(())
}
