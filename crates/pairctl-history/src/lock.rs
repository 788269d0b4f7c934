//! Per-replica operation locks.
//!
//! A lock is a file `<replica>.lock` created with create-new semantics, so
//! two processes racing for the same replica cannot both succeed. The file
//! records which operation, process and host hold it. A lock left behind by
//! a process that no longer exists on this host is reclaimed.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pairctl_core::{NodeId, OperationId};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{HistoryError, Result};

/// Contents of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// The locked replica.
    pub replica: NodeId,
    /// The operation holding the lock.
    pub operation: OperationId,
    /// Process id of the holder.
    pub pid: u32,
    /// Host name of the holder.
    pub host: String,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
}

impl LockInfo {
    fn current(replica: NodeId, operation: OperationId) -> Self {
        Self {
            replica,
            operation,
            pid: std::process::id(),
            host: local_host(),
            acquired_at: Utc::now(),
        }
    }

    /// Returns true if the holder is known to be gone.
    ///
    /// Only locks taken on this host can be checked; locks from other hosts
    /// sharing the state directory are never considered stale.
    pub fn is_stale(&self) -> bool {
        if self.host != local_host() {
            return false;
        }
        let proc_root = Path::new("/proc");
        if !proc_root.join("self").exists() {
            return false;
        }
        !proc_root.join(self.pid.to_string()).exists()
    }
}

fn local_host() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Hands out replica locks from one directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    /// Opens or creates the lock directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn lock_path(&self, replica: NodeId) -> PathBuf {
        self.dir.join(format!("{}.lock", replica.inner()))
    }

    /// Takes the lock for `replica` on behalf of `operation`.
    ///
    /// Fails with [`HistoryError::Locked`] while another live operation
    /// holds it.
    pub fn acquire(&self, replica: NodeId, operation: OperationId) -> Result<LockGuard> {
        let path = self.lock_path(replica);
        let info = LockInfo::current(replica, operation);

        match self.create(&path, &info) {
            Ok(()) => {}
            Err(HistoryError::Io(e)) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = self.read(&path)?;
                if !holder.is_stale() {
                    return Err(HistoryError::Locked {
                        replica,
                        operation: holder.operation,
                        pid: holder.pid,
                        host: holder.host,
                    });
                }

                warn!(
                    replica = %replica,
                    operation = %holder.operation,
                    pid = holder.pid,
                    "Reclaiming lock from dead process"
                );
                fs::remove_file(&path)?;
                // A concurrent reclaimer may win this create; it then holds the lock.
                self.create(&path, &info).map_err(|e| match e {
                    HistoryError::Io(io) if io.kind() == ErrorKind::AlreadyExists => {
                        HistoryError::Locked {
                            replica,
                            operation: holder.operation,
                            pid: holder.pid,
                            host: holder.host.clone(),
                        }
                    }
                    other => other,
                })?;
            }
            Err(e) => return Err(e),
        }

        debug!(replica = %replica, operation = %operation.short(), "Lock acquired");
        Ok(LockGuard { path, info })
    }

    /// Returns the current holder of a replica lock.
    pub fn holder(&self, replica: NodeId) -> Result<Option<LockInfo>> {
        let path = self.lock_path(replica);
        if !path.exists() {
            return Ok(None);
        }
        self.read(&path).map(Some)
    }

    /// Returns the holders of every lock whose process is not known to be gone.
    pub fn live_holders(&self) -> Result<Vec<LockInfo>> {
        let mut holders = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            match self.read(&path) {
                Ok(info) if !info.is_stale() => holders.push(info),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable lock file"),
            }
        }
        holders.sort_by_key(|info| info.replica);
        Ok(holders)
    }

    /// Removes a replica lock regardless of its holder.
    ///
    /// Returns the removed holder, if the lock file was readable.
    pub fn force_release(&self, replica: NodeId) -> Result<Option<LockInfo>> {
        let path = self.lock_path(replica);
        let holder = self.read(&path).ok();
        match fs::remove_file(&path) {
            Ok(()) => {
                warn!(replica = %replica, "Lock removed by operator");
                Ok(holder)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self, path: &Path, info: &LockInfo) -> Result<()> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        file.write_all(&serde_json::to_vec(info)?)?;
        file.sync_all()?;
        Ok(())
    }

    fn read(&self, path: &Path) -> Result<LockInfo> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| HistoryError::corrupted(path.display().to_string(), e.to_string()))
    }
}

/// Holds a replica lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    info: LockInfo,
}

impl LockGuard {
    /// Returns the lock record.
    pub fn info(&self) -> &LockInfo {
        &self.info
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to release lock");
            }
        }
        debug!(replica = %self.info.replica, "Lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let temp_dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(temp_dir.path()).unwrap();

        let first = OperationId::new();
        let guard = locks.acquire(NodeId(2), first).unwrap();

        let err = locks.acquire(NodeId(2), OperationId::new()).unwrap_err();
        match err {
            HistoryError::Locked { operation, pid, .. } => {
                assert_eq!(operation, first);
                assert_eq!(pid, std::process::id());
            }
            other => panic!("unexpected error: {other}"),
        }

        // Other replicas are independent
        let _other = locks.acquire(NodeId(3), OperationId::new()).unwrap();

        drop(guard);
        locks.acquire(NodeId(2), OperationId::new()).unwrap();
    }

    #[test]
    fn test_holder_and_force_release() {
        let temp_dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(temp_dir.path()).unwrap();
        assert!(locks.holder(NodeId(2)).unwrap().is_none());

        let op = OperationId::new();
        let guard = locks.acquire(NodeId(2), op).unwrap();
        assert_eq!(locks.holder(NodeId(2)).unwrap().unwrap().operation, op);

        let removed = locks.force_release(NodeId(2)).unwrap().unwrap();
        assert_eq!(removed.operation, op);
        assert!(locks.force_release(NodeId(2)).unwrap().is_none());

        // The guard tolerates a lock removed underneath it
        drop(guard);
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let temp_dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(temp_dir.path()).unwrap();

        let dead = LockInfo {
            replica: NodeId(2),
            operation: OperationId::new(),
            pid: u32::MAX,
            host: local_host(),
            acquired_at: Utc::now(),
        };
        fs::write(
            temp_dir.path().join("2.lock"),
            serde_json::to_vec(&dead).unwrap(),
        )
        .unwrap();

        if dead.is_stale() {
            let guard = locks.acquire(NodeId(2), OperationId::new()).unwrap();
            assert_ne!(guard.info().operation, dead.operation);
        } else {
            assert!(locks.acquire(NodeId(2), OperationId::new()).unwrap_err().is_locked());
        }
    }

    #[test]
    fn test_foreign_host_lock_is_never_stale() {
        let info = LockInfo {
            replica: NodeId(2),
            operation: OperationId::new(),
            pid: u32::MAX,
            host: "some-other-host.invalid".into(),
            acquired_at: Utc::now(),
        };
        assert!(!info.is_stale());
    }

    #[test]
    fn test_live_holders() {
        let temp_dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(temp_dir.path()).unwrap();
        assert!(locks.live_holders().unwrap().is_empty());

        let third = locks.acquire(NodeId(3), OperationId::new()).unwrap();
        let second = locks.acquire(NodeId(2), OperationId::new()).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"not a lock").unwrap();

        let replicas: Vec<_> = locks.live_holders().unwrap().iter().map(|i| i.replica).collect();
        assert_eq!(replicas, vec![NodeId(2), NodeId(3)]);

        drop(second);
        drop(third);
        assert!(locks.live_holders().unwrap().is_empty());
    }
}
