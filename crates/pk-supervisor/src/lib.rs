//! pk-supervisor: Worker process supervision for portkeep
//!
//! Each tunnel runs in its own detached worker process. This crate holds
//! the three pieces that manage those processes:
//!
//! - [`Supervisor`] spawns a worker, confirms it survives its start-up
//!   window and records it in the registry
//! - [`DaemonRuntime`] runs inside the worker, driving the tunnel until it
//!   fails or a shutdown signal arrives
//! - [`Teardown`] stops a recorded worker and removes its record

pub mod daemon;
pub mod error;
pub mod signal;
pub mod spawn;
pub mod teardown;

pub use daemon::{DaemonRuntime, DaemonState, RegistryBinding};
pub use error::{DaemonError, SupervisorError, TeardownError};
pub use signal::shutdown_signal;
pub use spawn::{Supervisor, WorkerCommand};
pub use teardown::{Disconnected, Teardown};
