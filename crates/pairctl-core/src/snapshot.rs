//! Point-in-time exports of primary state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::error::{ModelError, Result};
use crate::link::PositionToken;
use crate::node::NodeId;
use crate::operation::OperationId;

/// Unique identifier for a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    /// Creates a new random snapshot id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the first 8 characters, for logs and tables.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SnapshotId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// An immutable export of primary data tagged with its position.
///
/// The payload lives in `path`; the snapshot itself only records where and
/// what it is. A snapshot is consumed by at most one operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique identifier.
    pub id: SnapshotId,

    /// Node the export was taken from.
    pub source: NodeId,

    /// Operation that created the snapshot.
    pub created_by: OperationId,

    /// Databases included in the export.
    pub databases: Vec<String>,

    /// Source position at export time.
    pub position: PositionToken,

    /// Location of the dump payload.
    pub path: PathBuf,

    /// CRC32 of the payload.
    pub checksum: u32,

    /// Payload size in bytes.
    pub size_bytes: u64,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Operation that restored this snapshot, once consumed.
    pub consumed_by: Option<OperationId>,
}

impl Snapshot {
    /// Creates an unconsumed snapshot record.
    pub fn new(
        source: NodeId,
        created_by: OperationId,
        databases: Vec<String>,
        position: PositionToken,
        path: impl Into<PathBuf>,
        payload: &[u8],
    ) -> Self {
        Self {
            id: SnapshotId::new(),
            source,
            created_by,
            databases,
            position,
            path: path.into(),
            checksum: crc32fast::hash(payload),
            size_bytes: payload.len() as u64,
            created_at: Utc::now(),
            consumed_by: None,
        }
    }

    /// Marks the snapshot as restored by `operation`.
    ///
    /// Consuming again from the same operation is a no-op so a retried
    /// restore step stays idempotent.
    pub fn consume(&mut self, operation: OperationId) -> Result<()> {
        match self.consumed_by {
            None => {
                self.consumed_by = Some(operation);
                Ok(())
            }
            Some(existing) if existing == operation => Ok(()),
            Some(_) => Err(ModelError::SnapshotConsumed(self.id)),
        }
    }

    /// Returns true if the snapshot has been restored.
    pub fn is_consumed(&self) -> bool {
        self.consumed_by.is_some()
    }

    /// Checks a payload against the recorded checksum and size.
    pub fn matches_payload(&self, payload: &[u8]) -> bool {
        payload.len() as u64 == self.size_bytes && crc32fast::hash(payload) == self.checksum
    }
}
