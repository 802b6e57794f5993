//! Hidden worker entry point (`portkeep daemon portforward`)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use pk_core::config::{DaemonSettings, Profile};
use pk_core::{Registry, TunnelParams};
use pk_supervisor::{shutdown_signal, DaemonRuntime, RegistryBinding};
use pk_tunnel::TcpRelay;

/// Parameters handed to a worker by the supervisor; all are required
#[derive(Debug, Clone, Args)]
pub struct PortforwardArgs {
    /// Cluster profile used to resolve the target
    #[arg(long)]
    pub profile: PathBuf,
    /// Namespace of the service
    #[arg(long)]
    pub namespace: String,
    /// Service name the tunnel is registered under
    #[arg(long)]
    pub service: String,
    /// Target behind the service
    #[arg(long)]
    pub target: String,
    /// Local port or addr:port to listen on
    #[arg(long)]
    pub local_port: String,
    /// Port on the target
    #[arg(long)]
    pub remote_port: u16,
}

impl From<PortforwardArgs> for TunnelParams {
    fn from(args: PortforwardArgs) -> Self {
        TunnelParams {
            name: args.service,
            namespace: args.namespace,
            target: args.target,
            local_port: args.local_port,
            remote_port: args.remote_port,
            profile: args.profile,
        }
    }
}

/// Run one tunnel as a detached worker until it fails or is signalled
pub async fn daemon_portforward(
    state_dir: &Path,
    args: PortforwardArgs,
    settings: &DaemonSettings,
) -> Result<()> {
    let params = TunnelParams::from(args);
    tracing::info!(
        "Worker {} starting for {} (target {}, localhost:{} -> {})",
        std::process::id(),
        params.key(),
        params.target,
        params.local_port,
        params.remote_port
    );

    let profile = Profile::load(&params.profile)
        .with_context(|| format!("Failed to load profile {:?}", params.profile))?;
    let relay = TcpRelay::for_params(&params, &profile)?;

    let registry = Arc::new(Registry::in_dir(state_dir));
    let mut runtime = DaemonRuntime::detached(
        params.key(),
        RegistryBinding::current_process(registry),
        settings,
    );

    runtime.run(Box::new(relay), shutdown_signal()).await?;
    Ok(())
}
