//! Worker supervisor
//!
//! Starts one detached worker process per tunnel and only records it once
//! it has survived a short readiness window. The whole check, spawn and
//! record sequence runs under an exclusive lock on `connect.lock`, so two
//! concurrent `connect` invocations for the same key cannot both succeed.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use pk_core::config::{worker_log_path, SupervisorSettings};
use pk_core::lock::FileLock;
use pk_core::{LivenessProbe, OsProbe, Registry, RegistryError, TunnelParams, TunnelRecord};

use crate::error::SupervisorError;

/// Lock file held for the duration of a connect
const CONNECT_LOCK_FILE_NAME: &str = "connect.lock";

/// Program named in the foreground hint
const FOREGROUND_PROGRAM: &str = "portkeep";

/// The program (and leading arguments) used to start a worker
///
/// Tunnel parameters are appended as `--flag value` pairs after the
/// leading arguments.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// This executable re-invoked with the hidden `daemon portforward` subcommand
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).args(["daemon", "portforward"]))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Build the detached command for one tunnel
    fn command(&self, params: &TunnelParams) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(daemon_args(params))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Start a new session so the worker outlives the invoking terminal
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // SAFETY: setsid is async-signal-safe and touches no parent state.
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        cmd
    }
}

/// Flags passed to `daemon portforward`
pub fn daemon_args(params: &TunnelParams) -> Vec<OsString> {
    vec![
        "--profile".into(),
        params.profile.clone().into_os_string(),
        "--namespace".into(),
        params.namespace.clone().into(),
        "--service".into(),
        params.name.clone().into(),
        "--target".into(),
        params.target.clone().into(),
        "--local-port".into(),
        params.local_port.clone().into(),
        "--remote-port".into(),
        params.remote_port.to_string().into(),
    ]
}

/// Spawns workers and commits their registry records
pub struct Supervisor {
    registry: Arc<Registry>,
    probe: Arc<dyn LivenessProbe>,
    worker: WorkerCommand,
    settings: SupervisorSettings,
    state_dir: PathBuf,
}

impl Supervisor {
    /// Create a supervisor whose registry and locks live in `state_dir`
    pub fn new(registry: Arc<Registry>, state_dir: impl Into<PathBuf>, worker: WorkerCommand) -> Self {
        Self {
            registry,
            probe: Arc::new(OsProbe),
            worker,
            settings: SupervisorSettings::default(),
            state_dir: state_dir.into(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_settings(mut self, settings: SupervisorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Start a worker for `params` and record it as active
    pub async fn spawn(&self, params: &TunnelParams) -> Result<TunnelRecord, SupervisorError> {
        let _lock = self.acquire_connect_lock().await?;

        self.ensure_not_connected(params)?;

        let mut child = self
            .worker
            .command(params)
            .spawn()
            .map_err(|source| SupervisorError::SpawnFailed {
                program: self.worker.program.clone(),
                source,
            })?;
        let pid = child.id();
        tracing::debug!(
            "Spawned worker {} for {}/{}",
            pid,
            params.namespace,
            params.name
        );

        self.await_readiness(&mut child, params).await?;

        let record = TunnelRecord::active(pid, params);
        if let Err(source) = self.registry.add(record.clone()) {
            tracing::error!("Failed to record worker {}: {}; killing it", pid, source);
            if let Err(e) = child.kill() {
                tracing::warn!("Failed to kill unrecorded worker {}: {}", pid, e);
            } else if let Err(e) = child.wait() {
                tracing::debug!("Failed to reap worker {}: {}", pid, e);
            }
            return Err(SupervisorError::RegistryWriteFailed {
                name: params.name.clone(),
                scope: params.namespace.clone(),
                pid,
                source,
            });
        }

        tracing::info!(
            "Worker {} serving {}/{} on localhost:{}",
            pid,
            params.namespace,
            params.name,
            params.local_port
        );
        Ok(record)
    }

    /// Wait for `connect.lock` on the blocking pool
    ///
    /// Another connect may hold it for a whole readiness window.
    async fn acquire_connect_lock(&self) -> Result<FileLock, SupervisorError> {
        let lock_path = self.state_dir.join(CONNECT_LOCK_FILE_NAME);
        let path = lock_path.clone();
        let lock = tokio::task::spawn_blocking(move || FileLock::acquire(&path))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            .and_then(|acquired| acquired)
            .map_err(|source| RegistryError::Lock {
                path: lock_path,
                source,
            })?;
        tracing::trace!("Holding {:?}", lock.path());
        Ok(lock)
    }

    /// Fail if a live worker owns the key; reclassify dead ones
    fn ensure_not_connected(&self, params: &TunnelParams) -> Result<(), SupervisorError> {
        let active = self
            .registry
            .load()?
            .into_iter()
            .filter(|r| r.is_active() && r.matches(&params.name, &params.namespace));

        for existing in active {
            if self.probe.is_alive(existing.pid) {
                return Err(SupervisorError::AlreadyConnected {
                    name: existing.name,
                    scope: existing.namespace,
                    pid: existing.pid,
                    local_port: existing.local_port,
                });
            }

            tracing::info!(
                "Worker {} for {}/{} is gone; marking it stopped",
                existing.pid,
                existing.namespace,
                existing.name
            );
            self.registry
                .mark_worker_stopped(&existing.name, &existing.namespace, existing.pid)?;
        }

        Ok(())
    }

    /// Watch the child for the grace period; it must still be running at the end
    async fn await_readiness(
        &self,
        child: &mut Child,
        params: &TunnelParams,
    ) -> Result<(), SupervisorError> {
        let pid = child.id();
        let deadline = Instant::now() + self.settings.readiness_grace;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    tracing::warn!("Worker {} exited during start-up: {}", pid, status);
                    return Err(self.start_failed(pid, params));
                }
                Ok(None) => {}
                Err(e) => tracing::debug!("Failed to poll worker {}: {}", pid, e),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let wait = self.settings.poll_interval.min(deadline - now);
            tokio::time::sleep(wait).await;
        }

        if !self.probe.is_alive(pid) {
            return Err(self.start_failed(pid, params));
        }
        Ok(())
    }

    fn start_failed(&self, pid: u32, params: &TunnelParams) -> SupervisorError {
        SupervisorError::DaemonStartFailed {
            name: params.name.clone(),
            scope: params.namespace.clone(),
            pid,
            hint: self.foreground_hint(params),
        }
    }

    /// The attached command that reproduces the worker, plus its log file
    pub fn foreground_hint(&self, params: &TunnelParams) -> String {
        format!(
            "{} connect {} --namespace {} --profile {} --local-port {} --remote-port {} --foreground \
             (worker log: {})",
            FOREGROUND_PROGRAM,
            params.name,
            params.namespace,
            params.profile.display(),
            params.local_port,
            params.remote_port,
            worker_log_path(&self.state_dir, &params.namespace, &params.name).display()
        )
    }
}
