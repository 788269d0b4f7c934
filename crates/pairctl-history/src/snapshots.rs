//! Snapshot catalog.
//!
//! Each snapshot is stored as two files in the catalog directory: the dump
//! payload (`<id>.sql`) and its metadata (`<id>.json`). Both are written to a
//! temporary file first and renamed into place, so a crash never leaves a
//! half-written snapshot visible.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use pairctl_core::{OperationId, Snapshot, SnapshotId};
use tracing::{debug, info, warn};

use crate::{HistoryError, Result};

/// Storage for snapshot payloads and metadata.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stores a new snapshot and its payload. Returns the record with its
    /// final payload path.
    async fn store(&self, snapshot: Snapshot, payload: &[u8]) -> Result<Snapshot>;

    /// Loads snapshot metadata.
    async fn load(&self, id: SnapshotId) -> Result<Snapshot>;

    /// Lists all snapshots, oldest first.
    async fn list(&self) -> Result<Vec<Snapshot>>;

    /// Reads a payload and checks it against the recorded checksum.
    async fn read_payload(&self, id: SnapshotId) -> Result<(Snapshot, Vec<u8>)>;

    /// Marks a snapshot as restored by `operation` and persists the change.
    async fn consume(&self, id: SnapshotId, operation: OperationId) -> Result<Snapshot>;

    /// Deletes a snapshot. Purging a missing snapshot is not an error.
    async fn purge(&self, id: SnapshotId) -> Result<()>;
}

/// File-backed snapshot catalog.
pub struct FileSnapshotStore {
    base_path: PathBuf,
}

impl FileSnapshotStore {
    /// Opens or creates a catalog directory.
    pub async fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    /// Returns the catalog directory.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn metadata_path(&self, id: SnapshotId) -> PathBuf {
        self.base_path.join(format!("{}.json", id))
    }

    fn payload_path(&self, id: SnapshotId) -> PathBuf {
        self.base_path.join(format!("{}.sql", id))
    }

    async fn write_metadata(&self, snapshot: &Snapshot) -> Result<()> {
        let path = self.metadata_path(snapshot.id);
        let json = serde_json::to_string_pretty(snapshot)?;
        write_atomic(&path, json.as_bytes()).await
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = PathBuf::from(temp_path);
    tokio::fs::write(&temp_path, data).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn store(&self, mut snapshot: Snapshot, payload: &[u8]) -> Result<Snapshot> {
        if !snapshot.matches_payload(payload) {
            return Err(HistoryError::ChecksumMismatch(snapshot.id));
        }

        snapshot.path = self.payload_path(snapshot.id);
        write_atomic(&snapshot.path, payload).await?;
        self.write_metadata(&snapshot).await?;

        info!(
            snapshot = %snapshot.id.short(),
            source = %snapshot.source,
            databases = ?snapshot.databases,
            position = %snapshot.position,
            size_bytes = snapshot.size_bytes,
            "Snapshot stored"
        );
        Ok(snapshot)
    }

    async fn load(&self, id: SnapshotId) -> Result<Snapshot> {
        let path = self.metadata_path(id);
        if !path.exists() {
            return Err(HistoryError::SnapshotNotFound(id));
        }

        let content = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&content)
            .map_err(|e| HistoryError::corrupted(path.display().to_string(), e.to_string()))
    }

    async fn list(&self) -> Result<Vec<Snapshot>> {
        let mut snapshots = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                let content = tokio::fs::read_to_string(&path).await?;
                match serde_json::from_str::<Snapshot>(&content) {
                    Ok(snapshot) => snapshots.push(snapshot),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable snapshot metadata"),
                }
            }
        }

        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(snapshots)
    }

    async fn read_payload(&self, id: SnapshotId) -> Result<(Snapshot, Vec<u8>)> {
        let snapshot = self.load(id).await?;
        let payload = tokio::fs::read(&snapshot.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                HistoryError::SnapshotNotFound(id)
            } else {
                HistoryError::Io(e)
            }
        })?;

        if !snapshot.matches_payload(&payload) {
            return Err(HistoryError::ChecksumMismatch(id));
        }
        Ok((snapshot, payload))
    }

    async fn consume(&self, id: SnapshotId, operation: OperationId) -> Result<Snapshot> {
        let mut snapshot = self.load(id).await?;
        snapshot.consume(operation)?;
        self.write_metadata(&snapshot).await?;
        debug!(snapshot = %id.short(), operation = %operation.short(), "Snapshot consumed");
        Ok(snapshot)
    }

    async fn purge(&self, id: SnapshotId) -> Result<()> {
        let mut removed = false;
        for path in [self.payload_path(id), self.metadata_path(id)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if removed {
            info!(snapshot = %id.short(), "Snapshot purged");
        }
        Ok(())
    }
}
