//! Append-only operation journal.
//!
//! Every operation transition is appended as a full [`Operation`] record.
//! Replaying the journal yields the latest record of each operation, which
//! is how an interrupted operation is resumed after a crash. Entries carry
//! a CRC32 checksum; a torn or tampered line is skipped with a warning.
//!
//! The file only grows while operations run. [`Journal::compact`] rewrites
//! it to the latest record of each operation, dropping the oldest finished
//! operations beyond a retention count. The rewrite goes to a sibling file
//! that is synced and renamed over the journal, so a crash leaves either
//! the old or the new file in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use pairctl_core::{Operation, OperationId, OperationKind};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::Result;

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Monotonic sequence number within the journal file.
    pub sequence: u64,
    /// When the entry was written.
    pub written_at: DateTime<Utc>,
    /// The operation as of this transition.
    pub operation: Operation,
    /// CRC32 over the other fields.
    pub checksum: u32,
}

impl JournalEntry {
    /// Creates an entry and computes its checksum.
    pub fn new(sequence: u64, operation: Operation) -> Self {
        let mut entry = Self {
            sequence,
            written_at: Utc::now(),
            operation,
            checksum: 0,
        };
        entry.checksum = entry.calculate_checksum();
        entry
    }

    /// Computes the checksum of this entry.
    pub fn calculate_checksum(&self) -> u32 {
        let data = format!(
            "{}:{}:{}",
            self.sequence,
            self.written_at.timestamp_nanos_opt().unwrap_or(0),
            serde_json::to_string(&self.operation).unwrap_or_default(),
        );
        crc32fast::hash(data.as_bytes())
    }

    /// Returns true if the stored checksum matches the content.
    pub fn verify(&self) -> bool {
        self.checksum == self.calculate_checksum()
    }
}

/// What a compaction removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionReport {
    /// Valid entries before the rewrite.
    pub entries_before: usize,
    /// Entries after the rewrite.
    pub entries_after: usize,
    /// Finished operations dropped from the journal.
    pub operations_dropped: usize,
}

/// Journal file handle.
pub struct Journal {
    path: PathBuf,
    file: File,
    sequence: AtomicU64,
    sync_on_write: bool,
}

impl Journal {
    /// Opens or creates a journal file.
    pub async fn open(path: impl AsRef<Path>, sync_on_write: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let sequence = read_entries(&path)
            .await?
            .last()
            .map(|e| e.sequence)
            .unwrap_or(0);

        Ok(Self {
            path,
            file,
            sequence: AtomicU64::new(sequence),
            sync_on_write,
        })
    }

    /// Returns the journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the current record of an operation.
    pub async fn append(&mut self, operation: &Operation) -> Result<u64> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = JournalEntry::new(sequence, operation.clone());

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file.write_all(&line).await?;

        if self.sync_on_write {
            self.file.sync_all().await?;
        }

        debug!(
            sequence,
            operation = %operation.id,
            state = %operation.state,
            phase = operation.phase(),
            "Journal entry written"
        );
        Ok(sequence)
    }

    /// Returns the current sequence number.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Reads all valid entries in write order.
    pub async fn entries(&self) -> Result<Vec<JournalEntry>> {
        read_entries(&self.path).await
    }

    /// Returns the latest record of every operation, oldest first.
    pub async fn operations(&self) -> Result<Vec<Operation>> {
        let mut latest: BTreeMap<OperationId, (u64, Operation)> = BTreeMap::new();
        for entry in self.entries().await? {
            latest.insert(entry.operation.id, (entry.sequence, entry.operation));
        }

        let mut ops: Vec<_> = latest.into_values().collect();
        ops.sort_by_key(|(sequence, _)| *sequence);
        Ok(ops.into_iter().map(|(_, op)| op).collect())
    }

    /// Returns the latest record of one operation.
    pub async fn operation(&self, id: OperationId) -> Result<Option<Operation>> {
        Ok(self.operations().await?.into_iter().find(|op| op.id == id))
    }

    /// Returns the newest unfinished operation of the given kind.
    ///
    /// An operation is unfinished when it is pending, running (the process
    /// died mid-run) or step-failed.
    pub async fn resumable(&self, kind: &OperationKind) -> Result<Option<Operation>> {
        Ok(self
            .operations()
            .await?
            .into_iter()
            .rev()
            .find(|op| &op.kind == kind && !op.state.is_terminal()))
    }

    /// Rewrites the journal to the latest record of each operation.
    ///
    /// Unfinished operations are always kept. Of the finished ones only the
    /// newest `keep_finished` survive. Sequence numbers and checksums of the
    /// kept entries are unchanged, so the sequence keeps counting up.
    pub async fn compact(&mut self, keep_finished: usize) -> Result<CompactionReport> {
        let entries = self.entries().await?;
        let entries_before = entries.len();

        let mut latest: BTreeMap<OperationId, JournalEntry> = BTreeMap::new();
        for entry in entries {
            latest.insert(entry.operation.id, entry);
        }
        let mut kept: Vec<JournalEntry> = latest.into_values().collect();
        kept.sort_by_key(|e| e.sequence);

        let finished = kept.iter().filter(|e| e.operation.state.is_terminal()).count();
        let mut to_drop = finished.saturating_sub(keep_finished);
        let operations_dropped = to_drop;
        kept.retain(|e| {
            if to_drop > 0 && e.operation.state.is_terminal() {
                to_drop -= 1;
                return false;
            }
            true
        });

        let staging = self.path.with_extension("jsonl.compact");
        {
            let mut out = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&staging)
                .await?;
            for entry in &kept {
                let mut line = serde_json::to_vec(entry)?;
                line.push(b'\n');
                out.write_all(&line).await?;
            }
            out.sync_all().await?;
        }
        tokio::fs::rename(&staging, &self.path).await?;

        self.file = OpenOptions::new().append(true).open(&self.path).await?;

        let report = CompactionReport {
            entries_before,
            entries_after: kept.len(),
            operations_dropped,
        };
        info!(
            path = %self.path.display(),
            entries_before,
            entries_after = report.entries_after,
            operations_dropped,
            "Journal compacted"
        );
        Ok(report)
    }
}

async fn read_entries(path: &Path) -> Result<Vec<JournalEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut entries = Vec::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<JournalEntry>(&line) {
            Ok(entry) if entry.verify() => entries.push(entry),
            Ok(entry) => {
                warn!(sequence = entry.sequence, "Journal entry failed integrity check");
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "Skipping unreadable journal line");
            }
        }
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairctl_core::{NodeId, OperationState};
    use std::collections::BTreeMap as Details;

    fn provision() -> Operation {
        Operation::new(OperationKind::Provision {
            replica: NodeId(2),
        })
    }

    #[test]
    fn test_entry_checksum_tamper_detection() {
        let mut entry = JournalEntry::new(1, provision());
        assert!(entry.verify());

        entry.sequence = 2;
        assert!(!entry.verify());
    }

    #[tokio::test]
    async fn test_latest_record_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.jsonl");

        let mut op = provision();
        {
            let mut journal = Journal::open(&path, false).await.unwrap();
            journal.append(&op).await.unwrap();
            op.start().unwrap();
            op.begin_step(0).unwrap();
            journal.append(&op).await.unwrap();
            op.complete_step(0, Details::new()).unwrap();
            journal.append(&op).await.unwrap();
        }

        let journal = Journal::open(&path, false).await.unwrap();
        assert_eq!(journal.current_sequence(), 3);

        let ops = journal.operations().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].state, OperationState::Running);
        assert_eq!(ops[0].next_step(), Some(1));
    }

    #[tokio::test]
    async fn test_resumable_ignores_terminal_operations() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(temp_dir.path().join("j.jsonl"), false)
            .await
            .unwrap();

        let kind = OperationKind::Refresh {
            replica: NodeId(2),
            database: "shop".into(),
        };

        let mut done = Operation::new(kind.clone());
        done.start().unwrap();
        for i in 0..done.steps.len() {
            done.complete_step(i, Details::new()).unwrap();
        }
        done.complete().unwrap();
        journal.append(&done).await.unwrap();
        assert!(journal.resumable(&kind).await.unwrap().is_none());

        let mut interrupted = Operation::new(kind.clone());
        interrupted.start().unwrap();
        interrupted.complete_step(0, Details::new()).unwrap();
        journal.append(&interrupted).await.unwrap();

        let found = journal.resumable(&kind).await.unwrap().unwrap();
        assert_eq!(found.id, interrupted.id);

        let other = OperationKind::Refresh {
            replica: NodeId(2),
            database: "billing".into(),
        };
        assert!(journal.resumable(&other).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_torn_line_is_skipped() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.jsonl");

        {
            let mut journal = Journal::open(&path, false).await.unwrap();
            journal.append(&provision()).await.unwrap();
        }
        let mut raw = tokio::fs::read(&path).await.unwrap();
        raw.extend_from_slice(b"{\"sequence\":2,\"written_");
        tokio::fs::write(&path, raw).await.unwrap();

        let journal = Journal::open(&path, false).await.unwrap();
        assert_eq!(journal.entries().await.unwrap().len(), 1);
        assert_eq!(journal.current_sequence(), 1);
    }

    fn finished(kind: OperationKind) -> Operation {
        let mut op = Operation::new(kind);
        op.start().unwrap();
        for i in 0..op.steps.len() {
            op.complete_step(i, Details::new()).unwrap();
        }
        op.complete().unwrap();
        op
    }

    #[tokio::test]
    async fn test_compact_keeps_latest_and_unfinished() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("journal.jsonl");
        let mut journal = Journal::open(&path, false).await.unwrap();

        let old = finished(OperationKind::Refresh {
            replica: NodeId(2),
            database: "shop".into(),
        });
        journal.append(&old).await.unwrap();
        let recent = finished(OperationKind::Refresh {
            replica: NodeId(2),
            database: "billing".into(),
        });
        journal.append(&recent).await.unwrap();

        let mut open = provision();
        journal.append(&open).await.unwrap();
        open.start().unwrap();
        open.complete_step(0, Details::new()).unwrap();
        journal.append(&open).await.unwrap();
        open.begin_step(1).unwrap();
        journal.append(&open).await.unwrap();

        let report = journal.compact(1).await.unwrap();
        assert_eq!(report.entries_before, 5);
        assert_eq!(report.entries_after, 2);
        assert_eq!(report.operations_dropped, 1);
        assert!(!path.with_extension("jsonl.compact").exists());

        let ops = journal.operations().await.unwrap();
        let ids: Vec<_> = ops.iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![recent.id, open.id]);
        assert_eq!(ops[1].next_step(), Some(1));
        assert_eq!(
            journal.resumable(&open.kind).await.unwrap().map(|op| op.id),
            Some(open.id)
        );

        // Appends continue the old sequence and survive a reopen.
        assert_eq!(journal.append(&open).await.unwrap(), 6);
        drop(journal);
        let journal = Journal::open(&path, false).await.unwrap();
        assert_eq!(journal.current_sequence(), 6);
        assert_eq!(journal.entries().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_compact_empty_journal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut journal = Journal::open(temp_dir.path().join("j.jsonl"), false)
            .await
            .unwrap();

        let report = journal.compact(0).await.unwrap();
        assert_eq!(report.entries_before, 0);
        assert_eq!(report.entries_after, 0);
        assert_eq!(journal.append(&provision()).await.unwrap(), 1);
    }
}
