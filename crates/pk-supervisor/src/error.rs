//! Supervision error types

use std::path::PathBuf;
use std::time::Duration;

use pk_core::RegistryError;
use pk_tunnel::TunnelError;
use thiserror::Error;

/// Errors from spawning and recording a worker
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A live worker already serves this key
    #[error("Connection to {scope}/{name} already exists on localhost:{local_port} (PID {pid})")]
    AlreadyConnected {
        name: String,
        scope: String,
        pid: u32,
        local_port: String,
    },

    /// The OS refused to create the worker
    #[error("Failed to start worker process {program:?}: {source}")]
    SpawnFailed {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The worker died inside the readiness window
    #[error(
        "Worker for {scope}/{name} (PID {pid}) exited during start-up. \
         Run it in the foreground to see the error: {hint}"
    )]
    DaemonStartFailed {
        name: String,
        scope: String,
        pid: u32,
        hint: String,
    },

    /// The worker is running but could not be recorded; it was killed
    #[error("Failed to record worker {pid} for {scope}/{name}: {source}")]
    RegistryWriteFailed {
        name: String,
        scope: String,
        pid: u32,
        #[source]
        source: RegistryError,
    },

    /// The registry could not be read or locked before spawning
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors ending a daemon runtime
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Tunnel reported failure before becoming ready
    #[error("Tunnel {scope}/{name} failed to start: {source}")]
    StartFailed {
        name: String,
        scope: String,
        #[source]
        source: TunnelError,
    },

    /// Tunnel did not become ready in time
    #[error("Tunnel {scope}/{name} timed out waiting for ready after {timeout:?}")]
    ReadyTimeout {
        name: String,
        scope: String,
        timeout: Duration,
    },

    /// Tunnel failed while running
    #[error("Tunnel {scope}/{name} failed: {source}")]
    Runtime {
        name: String,
        scope: String,
        #[source]
        source: TunnelError,
    },

    /// Tunnel task ended without reporting readiness or an error
    #[error("Tunnel {scope}/{name} task ended unexpectedly: {reason}")]
    TaskEnded {
        name: String,
        scope: String,
        reason: String,
    },
}

/// Errors from tearing a worker down
#[derive(Debug, Error)]
pub enum TeardownError {
    /// No record for the key
    #[error("Connection not found: {scope}/{name}")]
    NotFound { name: String, scope: String },

    /// Neither SIGTERM nor SIGKILL could be delivered
    #[error("Failed to kill process {pid}: {source}")]
    SignalFailed {
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    /// The worker was signalled but its record could not be removed
    #[error("Worker {pid} for {scope}/{name} was stopped but its record could not be removed: {source}")]
    RegistryRemoveFailed {
        name: String,
        scope: String,
        pid: u32,
        #[source]
        source: RegistryError,
    },

    /// The registry could not be read
    #[error(transparent)]
    Registry(#[from] RegistryError),
}
