//! Connect command implementation

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use pk_core::config::{resolve_profile_path, Profile, Settings};
use pk_core::{Registry, TunnelParams};
use pk_supervisor::{shutdown_signal, DaemonRuntime, Supervisor, WorkerCommand};
use pk_tunnel::TcpRelay;

use crate::output::{print_info, print_success};

/// Options collected from `portkeep connect`
#[derive(Debug, Clone)]
pub struct ConnectOptions<'a> {
    pub service: &'a str,
    pub namespace: &'a str,
    pub profile: Option<&'a Path>,
    pub local_port: Option<&'a str>,
    pub remote_port: Option<u16>,
    pub foreground: bool,
}

/// Resolve the service through the profile and open a tunnel to it
///
/// In the background (default) a detached worker is started and recorded;
/// in the foreground the tunnel runs attached until Ctrl+C.
pub async fn connect_command(
    state_dir: &Path,
    options: ConnectOptions<'_>,
    settings: &Settings,
    config_path: Option<&Path>,
) -> Result<()> {
    let profile_path = resolve_profile_path(options.profile, state_dir)?;
    let profile = Profile::load(&profile_path)
        .with_context(|| format!("Failed to load profile {:?}", profile_path))?;
    let resolved = profile.resolve(
        options.service,
        options.namespace,
        options.local_port,
        options.remote_port,
    )?;

    let params = TunnelParams {
        name: resolved.service,
        namespace: resolved.namespace,
        target: resolved.target,
        local_port: resolved.local_port,
        remote_port: resolved.remote_port,
        profile: absolute(profile_path),
    };

    if options.foreground {
        return run_foreground(&params, &profile, settings).await;
    }

    let mut worker = WorkerCommand::current_exe().context("Failed to locate portkeep executable")?;
    if let Some(path) = config_path {
        worker = worker.arg("--config").arg(path);
    }

    let registry = Arc::new(Registry::in_dir(state_dir));
    let record = Supervisor::new(registry, state_dir, worker)
        .with_settings(settings.supervisor.clone())
        .spawn(&params)
        .await?;

    print_success(&format!(
        "Connected {}/{} -> localhost:{} ({}:{}, PID {})",
        record.namespace, record.name, record.local_port, record.target, record.remote_port, record.pid
    ));
    Ok(())
}

async fn run_foreground(params: &TunnelParams, profile: &Profile, settings: &Settings) -> Result<()> {
    let relay = TcpRelay::for_params(params, profile)?;
    print_info(&format!(
        "Forwarding localhost:{} -> {} ({}/{}). Press Ctrl+C to stop",
        params.local_port,
        relay.upstream(),
        params.namespace,
        params.name
    ));

    let mut runtime = DaemonRuntime::foreground(params.key(), &settings.daemon);
    runtime.run(Box::new(relay), shutdown_signal()).await?;

    print_info(&format!("Tunnel {}/{} closed", params.namespace, params.name));
    Ok(())
}

/// Workers may run with a different working directory
fn absolute(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}
