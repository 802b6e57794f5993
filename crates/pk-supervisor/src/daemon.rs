//! Daemon runtime
//!
//! Runs inside a worker process and drives one tunnel through
//! `Starting -> Ready -> Running -> StoppedClean | StoppedError`.
//!
//! A detached worker owns its registry record: on a requested shutdown it
//! removes the record, on a tunnel failure it marks it stopped. Both
//! mutations are keyed on the worker's own PID, so a late exit never
//! touches a newer tunnel registered under the same key. Start-up failures
//! leave the registry alone; the supervisor has not recorded the worker yet.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use pk_core::config::DaemonSettings;
use pk_core::{Registry, TunnelKey};
use pk_tunnel::{TunnelError, TunnelIo};

use crate::error::DaemonError;

/// Lifecycle of a daemon runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Starting,
    Ready,
    Running,
    StoppedClean,
    StoppedError,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DaemonState::Starting => "starting",
            DaemonState::Ready => "ready",
            DaemonState::Running => "running",
            DaemonState::StoppedClean => "stopped",
            DaemonState::StoppedError => "failed",
        };
        f.write_str(name)
    }
}

/// The registry record a detached worker is responsible for
#[derive(Debug, Clone)]
pub struct RegistryBinding {
    registry: Arc<Registry>,
    pid: u32,
}

impl RegistryBinding {
    pub fn new(registry: Arc<Registry>, pid: u32) -> Self {
        Self { registry, pid }
    }

    /// Bind to the record owned by the current process
    pub fn current_process(registry: Arc<Registry>) -> Self {
        Self::new(registry, std::process::id())
    }
}

/// Drives a tunnel until it fails or a shutdown is requested
#[derive(Debug)]
pub struct DaemonRuntime {
    key: TunnelKey,
    binding: Option<RegistryBinding>,
    ready_timeout: Duration,
    state: DaemonState,
}

impl DaemonRuntime {
    /// Runtime for a detached worker that maintains its registry record
    pub fn detached(key: TunnelKey, binding: RegistryBinding, settings: &DaemonSettings) -> Self {
        Self {
            key,
            binding: Some(binding),
            ready_timeout: settings.ready_timeout,
            state: DaemonState::Starting,
        }
    }

    /// Runtime attached to the terminal; never touches the registry
    pub fn foreground(key: TunnelKey, settings: &DaemonSettings) -> Self {
        Self {
            key,
            binding: None,
            ready_timeout: settings.ready_timeout,
            state: DaemonState::Starting,
        }
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Run the tunnel to completion
    ///
    /// Returns `Ok(())` only when `shutdown` resolved and the tunnel stopped.
    pub async fn run<F>(&mut self, tunnel: Box<dyn TunnelIo>, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        self.transition(DaemonState::Starting);
        tracing::info!("Starting tunnel {}: {}", self.key, tunnel.describe());

        let (ready_tx, ready_rx) = oneshot::channel::<SocketAddr>();
        let stop = CancellationToken::new();
        let mut task = tokio::spawn(tunnel.run(ready_tx, stop.clone()));

        let bound = tokio::select! {
            ready = ready_rx => match ready {
                Ok(addr) => addr,
                // Sender dropped: the tunnel ended before binding
                Err(_) => {
                    self.transition(DaemonState::StoppedError);
                    return Err(self.start_failure(task.await));
                }
            },
            _ = tokio::time::sleep(self.ready_timeout) => {
                self.transition(DaemonState::StoppedError);
                stop.cancel();
                task.abort();
                return Err(DaemonError::ReadyTimeout {
                    name: self.key.name.clone(),
                    scope: self.key.scope.clone(),
                    timeout: self.ready_timeout,
                });
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown requested before {} became ready", self.key);
                return self.stop_clean(stop, task).await;
            }
        };

        self.transition(DaemonState::Ready);
        tracing::info!("Tunnel {} ready on {}", self.key, bound);
        self.transition(DaemonState::Running);

        tokio::select! {
            joined = &mut task => {
                self.transition(DaemonState::StoppedError);
                self.mark_stopped();
                Err(self.runtime_failure(joined))
            }
            _ = &mut shutdown => self.stop_clean(stop, task).await,
        }
    }

    fn transition(&mut self, next: DaemonState) {
        tracing::debug!("Tunnel {}: {} -> {}", self.key, self.state, next);
        self.state = next;
    }

    /// Cancel the tunnel, wait for it and drop our record
    async fn stop_clean(
        &mut self,
        stop: CancellationToken,
        task: JoinHandle<Result<(), TunnelError>>,
    ) -> Result<(), DaemonError> {
        stop.cancel();
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Tunnel {} reported an error while stopping: {}", self.key, e),
            Err(e) => tracing::warn!("Tunnel {} task failed while stopping: {}", self.key, e),
        }

        self.remove_record();
        self.transition(DaemonState::StoppedClean);
        tracing::info!("Tunnel {} stopped", self.key);
        Ok(())
    }

    fn remove_record(&self) {
        let Some(binding) = &self.binding else {
            return;
        };
        match binding
            .registry
            .remove_worker(&self.key.name, &self.key.scope, binding.pid)
        {
            Ok(Some(_)) => tracing::debug!("Removed registry record for {}", self.key),
            Ok(None) => tracing::debug!("No registry record for {} owned by {}", self.key, binding.pid),
            Err(e) => tracing::warn!("Failed to remove registry record for {}: {}", self.key, e),
        }
    }

    fn mark_stopped(&self) {
        let Some(binding) = &self.binding else {
            return;
        };
        match binding
            .registry
            .mark_worker_stopped(&self.key.name, &self.key.scope, binding.pid)
        {
            Ok(true) => tracing::debug!("Marked {} stopped", self.key),
            Ok(false) => tracing::debug!("No active record for {} owned by {}", self.key, binding.pid),
            Err(e) => tracing::warn!("Failed to mark {} stopped: {}", self.key, e),
        }
    }

    fn start_failure(&self, joined: Result<Result<(), TunnelError>, JoinError>) -> DaemonError {
        match joined {
            Ok(Err(source)) => DaemonError::StartFailed {
                name: self.key.name.clone(),
                scope: self.key.scope.clone(),
                source,
            },
            Ok(Ok(())) => self.task_ended("tunnel stopped before becoming ready".to_string()),
            Err(e) => self.task_ended(e.to_string()),
        }
    }

    fn runtime_failure(&self, joined: Result<Result<(), TunnelError>, JoinError>) -> DaemonError {
        match joined {
            Ok(Err(source)) => DaemonError::Runtime {
                name: self.key.name.clone(),
                scope: self.key.scope.clone(),
                source,
            },
            Ok(Ok(())) => self.task_ended("tunnel stopped without a shutdown request".to_string()),
            Err(e) => self.task_ended(e.to_string()),
        }
    }

    fn task_ended(&self, reason: String) -> DaemonError {
        DaemonError::TaskEnded {
            name: self.key.name.clone(),
            scope: self.key.scope.clone(),
            reason,
        }
    }
}
