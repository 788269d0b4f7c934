//! # pairctl-history
//!
//! Durable state for runbook operations.
//!
//! ## Architecture
//!
//! - **Journal**: append-only JSON-lines log of operation transitions. The
//!   journal is written and synced before every step transition and is the
//!   single source of truth for resuming an interrupted operation.
//! - **Snapshots**: file-backed catalog of snapshot payloads and metadata.
//! - **Locks**: one lock file per replica so at most one operation touches a
//!   replica at a time.
//!
//! [`StateDir`] opens all three under one directory:
//!
//! ```text
//! <state_dir>/journal.jsonl
//! <state_dir>/snapshots/<id>.json, <id>.sql
//! <state_dir>/locks/<replica>.lock
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use pairctl_core::{NodeId, Operation, OperationKind};
//! use pairctl_history::{Journal, LockManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let locks = LockManager::new("/var/lib/pairctl/locks")?;
//!     let mut journal = Journal::open("/var/lib/pairctl/journal.jsonl", true).await?;
//!
//!     let op = Operation::new(OperationKind::Provision { replica: NodeId::new(2) });
//!     let _guard = locks.acquire(NodeId::new(2), op.id)?;
//!     journal.append(&op).await?;
//!     Ok(())
//! }
//! ```

pub mod journal;
pub mod lock;
pub mod snapshots;

use std::path::{Path, PathBuf};

use pairctl_core::{ModelError, NodeId, OperationId, SnapshotId};
use thiserror::Error;

pub use journal::{CompactionReport, Journal, JournalEntry};
pub use lock::{LockGuard, LockInfo, LockManager};
pub use snapshots::{FileSnapshotStore, SnapshotStore};

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;

/// Errors raised by the journal, snapshot catalog and locks.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Failed to read or write state files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode or decode a record.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another operation holds the replica.
    #[error("operation {operation} (pid {pid} on {host}) is already running against {replica}")]
    Locked {
        /// The locked replica.
        replica: NodeId,
        /// The operation holding the lock.
        operation: OperationId,
        /// Process that holds the lock.
        pid: u32,
        /// Host that holds the lock.
        host: String,
    },

    /// The snapshot is not in the catalog.
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    /// A snapshot payload does not match its recorded checksum.
    #[error("snapshot {0} payload does not match its checksum")]
    ChecksumMismatch(SnapshotId),

    /// A stored record is unreadable.
    #[error("corrupted state file {path}: {reason}")]
    Corrupted {
        /// The file.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A model invariant was violated.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl HistoryError {
    /// Creates a corrupted file error.
    pub fn corrupted(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error is a lock rejection.
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}

/// Journal, snapshot catalog and locks of one state directory.
pub struct StateDir {
    /// Root directory.
    pub root: PathBuf,
    /// Operation journal.
    pub journal: Journal,
    /// Snapshot catalog.
    pub snapshots: FileSnapshotStore,
    /// Replica locks.
    pub locks: LockManager,
}

impl StateDir {
    /// Opens or creates the state directory layout under `root`.
    pub async fn open(root: impl AsRef<Path>, sync_on_write: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let journal = Journal::open(root.join("journal.jsonl"), sync_on_write).await?;
        let snapshots = FileSnapshotStore::new(root.join("snapshots")).await?;
        let locks = LockManager::new(root.join("locks"))?;

        Ok(Self {
            root,
            journal,
            snapshots,
            locks,
        })
    }
}
