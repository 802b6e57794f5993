//! Disconnect command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use pk_core::config::TeardownSettings;
use pk_core::Registry;
use pk_supervisor::Teardown;

use crate::output::{print_success, print_warning};

/// Stop the tunnel for (service, namespace) and forget it
pub async fn disconnect_command(
    state_dir: &Path,
    service: &str,
    namespace: &str,
    settings: &TeardownSettings,
) -> Result<()> {
    let registry = Arc::new(Registry::in_dir(state_dir));
    let outcome = Teardown::new(registry)
        .with_settings(settings.clone())
        .disconnect(service, namespace)
        .await?;

    if outcome.already_stopped {
        print_warning(&format!(
            "{}/{} was not running (PID {}); record removed",
            namespace, service, outcome.record.pid
        ));
    } else {
        print_success(&format!(
            "Disconnected {}/{} (PID {})",
            namespace, service, outcome.record.pid
        ));
    }
    Ok(())
}
