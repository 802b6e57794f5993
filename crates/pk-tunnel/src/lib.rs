//! pk-tunnel: Tunnel I/O for portkeep workers
//!
//! The supervisor only needs two things from a tunnel: a signal once it is
//! usable, and a way to stop it. [`TunnelIo`] is that contract;
//! [`TcpRelay`] implements it by listening on the local port and relaying
//! every accepted connection to the target.

mod error;
mod relay;

pub use error::TunnelError;
pub use relay::{parse_local_bind, TcpRelay};

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// A running tunnel, driven to completion by the daemon runtime
#[async_trait]
pub trait TunnelIo: Send + 'static {
    /// Human-readable description for logs
    fn describe(&self) -> String;

    /// Establish the tunnel and forward until `stop` fires or it fails
    ///
    /// Implementations send the bound local address on `ready` exactly once,
    /// after which the tunnel must accept traffic. Returning `Ok(())` means
    /// the tunnel was stopped on request; any failure, before or after
    /// readiness, is an `Err`.
    async fn run(
        self: Box<Self>,
        ready: oneshot::Sender<SocketAddr>,
        stop: CancellationToken,
    ) -> Result<(), TunnelError>;
}
