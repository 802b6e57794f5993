//! Teardown coordinator
//!
//! Stops the worker behind a registry record and removes the record.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pk_core::config::TeardownSettings;
use pk_core::process;
use pk_core::{LivenessProbe, OsProbe, Registry, TunnelRecord};

use crate::error::TeardownError;

/// Liveness poll interval while waiting to escalate
const ESCALATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Outcome of a disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected {
    /// The record that was removed
    pub record: TunnelRecord,
    /// The worker was already gone; no signal was sent
    pub already_stopped: bool,
}

/// Terminates workers and clears their records
pub struct Teardown {
    registry: Arc<Registry>,
    probe: Arc<dyn LivenessProbe>,
    settings: TeardownSettings,
}

impl Teardown {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            probe: Arc::new(OsProbe),
            settings: TeardownSettings::default(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_settings(mut self, settings: TeardownSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Stop the tunnel for (name, scope) and remove its record
    pub async fn disconnect(&self, name: &str, scope: &str) -> Result<Disconnected, TeardownError> {
        let record = self
            .registry
            .find(name, scope)?
            .ok_or_else(|| TeardownError::NotFound {
                name: name.to_string(),
                scope: scope.to_string(),
            })?;
        let pid = record.pid;

        // A stopped record's PID may already belong to an unrelated process
        let already_stopped = !record.is_active() || !self.probe.is_alive(pid);
        if already_stopped {
            tracing::info!("Worker {} for {}/{} is not running", pid, scope, name);
        } else {
            self.stop_worker(pid).await?;
        }

        self.registry
            .remove(name, scope)
            .map_err(|source| TeardownError::RegistryRemoveFailed {
                name: name.to_string(),
                scope: scope.to_string(),
                pid,
                source,
            })?;

        tracing::info!("Disconnected {}/{}", scope, name);
        Ok(Disconnected {
            record,
            already_stopped,
        })
    }

    /// SIGTERM, falling back to SIGKILL when SIGTERM cannot be delivered
    async fn stop_worker(&self, pid: u32) -> Result<(), TeardownError> {
        match process::terminate(pid) {
            Ok(()) => {
                tracing::debug!("Sent SIGTERM to {}", pid);
                if let Some(grace) = self.settings.escalate_after {
                    self.escalate(pid, grace).await;
                }
                Ok(())
            }
            Err(term_err) => {
                tracing::warn!("SIGTERM to {} failed: {}; sending SIGKILL", pid, term_err);
                process::kill(pid).map_err(|source| TeardownError::SignalFailed { pid, source })
            }
        }
    }

    /// SIGKILL the worker if it outlives `grace` after SIGTERM
    async fn escalate(&self, pid: u32, grace: Duration) {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !self.probe.is_alive(pid) {
                return;
            }
            tokio::time::sleep(ESCALATE_POLL_INTERVAL).await;
        }

        if !self.probe.is_alive(pid) {
            return;
        }
        tracing::warn!("Worker {} ignored SIGTERM for {:?}; sending SIGKILL", pid, grace);
        if let Err(e) = process::kill(pid) {
            tracing::debug!("SIGKILL to {} failed: {}", pid, e);
        }
    }
}
