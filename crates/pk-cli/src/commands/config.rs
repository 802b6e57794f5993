//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use pk_core::config::Settings;

/// Print the effective settings as TOML
pub fn config_show(settings: &Settings, source: &Path) -> Result<()> {
    let rendered = settings
        .to_toml()
        .context("Failed to render settings")?;

    if source.exists() {
        println!("# {}", source.display());
    } else {
        println!("# defaults ({} not found)", source.display());
    }
    print!("{}", rendered);
    Ok(())
}

/// Print the state directory
pub fn config_path(state_dir: &Path) -> Result<()> {
    println!("{}", state_dir.display());
    Ok(())
}
