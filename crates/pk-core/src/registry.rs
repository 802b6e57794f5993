//! Connection registry
//!
//! The registry is the persisted list of [`TunnelRecord`]s shared by the
//! CLI and every worker process. All mutations are full read-modify-write
//! cycles: load the whole file, change it in memory, write the whole file
//! back. A cycle holds the registry mutex (ordering callers inside this
//! process) and an exclusive advisory lock on `connections.lock` (ordering
//! separate processes).
//!
//! Writes go to a temporary file in the same directory which is synced and
//! then renamed over the registry, so a failed write never leaves a
//! truncated file behind.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::RegistryError;
use crate::lock::{create_private_dir, FileLock};
use crate::process::LivenessProbe;
use crate::types::{TunnelRecord, TunnelStatus};

/// Registry file name inside the state directory
pub const REGISTRY_FILE_NAME: &str = "connections.json";

/// Lock file name inside the state directory
const LOCK_FILE_NAME: &str = "connections.lock";

/// Durable mapping from (name, scope) to tunnel metadata
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

impl Registry {
    /// Create a registry backed by the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_file_name(LOCK_FILE_NAME);
        Self {
            path,
            lock_path,
            guard: Mutex::new(()),
        }
    }

    /// Create a registry using the standard file name inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(REGISTRY_FILE_NAME))
    }

    /// Path of the registry file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records
    ///
    /// A missing or empty file is an empty registry.
    pub fn load(&self) -> Result<Vec<TunnelRecord>, RegistryError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&data).map_err(|source| RegistryError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Replace the registry contents with `records`
    pub fn save(&self, records: &[TunnelRecord]) -> Result<(), RegistryError> {
        let _guard = self.lock_local();
        let _lock = self.lock_file()?;
        self.write_records(records)
    }

    /// Append a record
    ///
    /// Fails with [`RegistryError::Duplicate`] when an active record for the
    /// same (name, scope) exists. Stopped records for the key are replaced.
    pub fn add(&self, record: TunnelRecord) -> Result<(), RegistryError> {
        self.transact(|records| {
            if let Some(existing) = records
                .iter()
                .find(|r| r.is_active() && r.matches(&record.name, &record.namespace))
            {
                return Err(RegistryError::Duplicate {
                    name: record.name.clone(),
                    scope: record.namespace.clone(),
                    pid: existing.pid,
                });
            }

            records.retain(|r| !r.matches(&record.name, &record.namespace));
            records.push(record);
            Ok(((), true))
        })
    }

    /// Remove every record for (name, scope)
    ///
    /// Returns the first removed record, or `None` without touching the file
    /// when nothing matched.
    pub fn remove(&self, name: &str, scope: &str) -> Result<Option<TunnelRecord>, RegistryError> {
        self.transact(|records| {
            let removed = records.iter().find(|r| r.matches(name, scope)).cloned();
            if removed.is_some() {
                records.retain(|r| !r.matches(name, scope));
            }
            let changed = removed.is_some();
            Ok((removed, changed))
        })
    }

    /// Remove the record for (name, scope) only if it still belongs to `pid`
    ///
    /// Workers use this so a late shutdown cannot delete a newer tunnel
    /// registered under the same key.
    pub fn remove_worker(
        &self,
        name: &str,
        scope: &str,
        pid: u32,
    ) -> Result<Option<TunnelRecord>, RegistryError> {
        self.transact(|records| {
            let owned = |r: &TunnelRecord| r.matches(name, scope) && r.pid == pid;
            let removed = records.iter().find(|r| owned(r)).cloned();
            if removed.is_some() {
                records.retain(|r| !owned(r));
            }
            let changed = removed.is_some();
            Ok((removed, changed))
        })
    }

    /// Set the status of the first record for (name, scope)
    pub fn update_status(
        &self,
        name: &str,
        scope: &str,
        status: TunnelStatus,
    ) -> Result<(), RegistryError> {
        self.transact(|records| {
            let record = records
                .iter_mut()
                .find(|r| r.matches(name, scope))
                .ok_or_else(|| RegistryError::NotFound {
                    name: name.to_string(),
                    scope: scope.to_string(),
                })?;
            let changed = record.status != status;
            record.status = status;
            Ok(((), changed))
        })
    }

    /// Mark the record for (name, scope) stopped if it still belongs to `pid`
    ///
    /// Returns whether a record was changed.
    pub fn mark_worker_stopped(
        &self,
        name: &str,
        scope: &str,
        pid: u32,
    ) -> Result<bool, RegistryError> {
        self.transact(|records| {
            let mut changed = false;
            for record in records
                .iter_mut()
                .filter(|r| r.matches(name, scope) && r.pid == pid && r.is_active())
            {
                record.status = TunnelStatus::Stopped;
                changed = true;
            }
            Ok((changed, changed))
        })
    }

    /// Find the first record for (name, scope)
    ///
    /// Duplicates can only come from an older bug or a hand-edited file;
    /// the first match wins and nothing is merged.
    pub fn find(&self, name: &str, scope: &str) -> Result<Option<TunnelRecord>, RegistryError> {
        let _guard = self.lock_local();
        let records = self.load()?;
        Ok(records.into_iter().find(|r| r.matches(name, scope)))
    }

    /// Load all records, reclassifying active ones whose worker is gone
    ///
    /// The file is only rewritten when at least one record changed.
    pub fn reconcile(&self, probe: &dyn LivenessProbe) -> Result<Vec<TunnelRecord>, RegistryError> {
        self.transact(|records| {
            let mut changed = false;
            for record in records.iter_mut().filter(|r| r.is_active()) {
                if !probe.is_alive(record.pid) {
                    tracing::info!(
                        "Worker for {} (PID {}) is gone, marking stopped",
                        record.key(),
                        record.pid
                    );
                    record.status = TunnelStatus::Stopped;
                    changed = true;
                }
            }
            Ok((records.clone(), changed))
        })
    }

    /// Run one locked read-modify-write cycle
    ///
    /// `f` returns its result and whether the records must be written back.
    fn transact<T, F>(&self, f: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&mut Vec<TunnelRecord>) -> Result<(T, bool), RegistryError>,
    {
        let _guard = self.lock_local();
        let _lock = self.lock_file()?;

        let mut records = self.load()?;
        let (result, changed) = f(&mut records)?;
        if changed {
            self.write_records(&records)?;
        }
        Ok(result)
    }

    fn lock_local(&self) -> MutexGuard<'_, ()> {
        // The guarded data is `()`, so a poisoned lock carries no broken state
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_file(&self) -> Result<FileLock, RegistryError> {
        FileLock::acquire(&self.lock_path).map_err(|source| RegistryError::Lock {
            path: self.lock_path.clone(),
            source,
        })
    }

    fn write_records(&self, records: &[TunnelRecord]) -> Result<(), RegistryError> {
        let data = serde_json::to_string_pretty(records).map_err(RegistryError::Serialize)?;

        let io_err = |source: io::Error| RegistryError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            create_private_dir(parent).map_err(io_err)?;
        }

        let tmp_path = self.temp_path();
        if let Err(source) = write_private(&tmp_path, data.as_bytes()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(source));
        }

        if let Err(source) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(io_err(source));
        }

        tracing::debug!("Wrote {} record(s) to {:?}", records.len(), self.path);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| REGISTRY_FILE_NAME.to_string());
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, std::process::id()))
    }
}

/// Write `data` to a fresh owner-only file and flush it to disk
fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(data)?;
    file.write_all(b"\n")?;
    file.sync_all()
}
