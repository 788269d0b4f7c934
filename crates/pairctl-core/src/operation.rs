//! Multi-step runbook operations.
//!
//! An [`Operation`] owns an ordered list of [`StepRecord`]s. Each [`Step`] is
//! a tagged variant of one runbook action and declares the [`Compensation`]
//! that undoes it. The operation's state machine is:
//!
//! ```text
//! pending -> running -> completed
//!               |
//!               v
//!          step-failed -> rolled-back
//!               |
//!               +-> running (resume)
//! ```
//!
//! While running, the operation's phase is the name of its current step
//! (`creating-credentials`, `snapshotting`, `restoring`, ...).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{ModelError, Result};
use crate::node::NodeId;

/// Unique identifier for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub Uuid);

impl OperationId {
    /// Creates a new random operation id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the first 8 characters, for logs and tables.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an operation does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OperationKind {
    /// Initialize a replica from a primary snapshot and start replication.
    Provision {
        /// The replica being provisioned.
        replica: NodeId,
    },

    /// Replace a database on the primary from an external dump and resync
    /// the replica from a fresh snapshot.
    Refresh {
        /// The replica being resynchronized.
        replica: NodeId,
        /// The database being replaced.
        database: String,
    },

    /// Create a database on the primary and wait for it on the replica.
    AddDatabase {
        /// The replica the change is verified on.
        replica: NodeId,
        /// Database name.
        name: String,
    },

    /// Drop a database on the primary and wait for it to vanish on the replica.
    RemoveDatabase {
        /// The replica the change is verified on.
        replica: NodeId,
        /// Database name.
        name: String,
    },
}

impl OperationKind {
    /// Returns the operation name used in logs and the journal.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Provision { .. } => "provision",
            Self::Refresh { .. } => "refresh",
            Self::AddDatabase { .. } => "add-database",
            Self::RemoveDatabase { .. } => "remove-database",
        }
    }

    /// Returns the replica this operation locks.
    pub fn replica(&self) -> NodeId {
        match self {
            Self::Provision { replica }
            | Self::Refresh { replica, .. }
            | Self::AddDatabase { replica, .. }
            | Self::RemoveDatabase { replica, .. } => *replica,
        }
    }

    /// Returns true if a failed run is undone with compensations.
    ///
    /// Refresh replaces primary data and cannot be undone; a failed refresh
    /// is resumed instead.
    pub fn rolls_back(&self) -> bool {
        !matches!(self, Self::Refresh { .. } | Self::RemoveDatabase { .. })
    }

    /// Returns the ordered steps that implement this operation.
    pub fn plan(&self) -> Vec<Step> {
        match self {
            Self::Provision { .. } => vec![
                Step::CreateCredentials,
                Step::Snapshot,
                Step::Restore,
                Step::ArmReplication,
                Step::Verify,
            ],
            Self::Refresh { database, .. } => vec![
                Step::PauseReplication,
                Step::ReplaceDataset {
                    database: database.clone(),
                },
                Step::Snapshot,
                Step::Restore,
                Step::ArmReplication,
                Step::Verify,
            ],
            Self::AddDatabase { name, .. } => vec![
                Step::CreateDatabase { name: name.clone() },
                Step::VerifyDatabase {
                    name: name.clone(),
                    present: true,
                },
            ],
            Self::RemoveDatabase { name, .. } => vec![
                Step::DropDatabase { name: name.clone() },
                Step::VerifyDatabase {
                    name: name.clone(),
                    present: false,
                },
            ],
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provision { replica } => write!(f, "provision {}", replica),
            Self::Refresh { replica, database } => write!(f, "refresh {} on {}", database, replica),
            Self::AddDatabase { name, .. } => write!(f, "add-database {}", name),
            Self::RemoveDatabase { name, .. } => write!(f, "remove-database {}", name),
        }
    }
}

/// One runbook action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "kebab-case")]
pub enum Step {
    /// Create the replication user on the primary and grant it replication.
    CreateCredentials,

    /// Export the primary's databases with their source position.
    Snapshot,

    /// Load the snapshot onto the replica.
    Restore,

    /// Point the replica at the primary and start replication.
    ArmReplication,

    /// Wait until the replica reports a streaming link.
    Verify,

    /// Stop replication on the replica.
    PauseReplication,

    /// Drop, recreate and re-import a database on the primary.
    ReplaceDataset {
        /// The database being replaced.
        database: String,
    },

    /// Create a database on the primary.
    CreateDatabase {
        /// Database name.
        name: String,
    },

    /// Drop a database on the primary.
    DropDatabase {
        /// Database name.
        name: String,
    },

    /// Wait until a database is present on (or absent from) the replica.
    VerifyDatabase {
        /// Database name.
        name: String,
        /// Whether the database should exist.
        present: bool,
    },
}

impl Step {
    /// Returns the phase name reported while this step runs.
    pub fn phase(&self) -> &'static str {
        match self {
            Self::CreateCredentials => "creating-credentials",
            Self::Snapshot => "snapshotting",
            Self::Restore => "restoring",
            Self::ArmReplication => "arming-replication",
            Self::Verify => "verifying",
            Self::PauseReplication => "pausing-replication",
            Self::ReplaceDataset { .. } => "replacing-dataset",
            Self::CreateDatabase { .. } => "creating-database",
            Self::DropDatabase { .. } => "dropping-database",
            Self::VerifyDatabase { .. } => "verifying-database",
        }
    }

    /// Returns the action that undoes this step, if it can be undone.
    pub fn compensation(&self) -> Option<Compensation> {
        match self {
            Self::CreateCredentials => Some(Compensation::DropReplicationUser),
            Self::Snapshot => Some(Compensation::PurgeSnapshot),
            Self::Restore => Some(Compensation::UndoRestore),
            Self::ArmReplication => Some(Compensation::DisarmReplication),
            Self::PauseReplication => Some(Compensation::ResumeReplication),
            Self::CreateDatabase { name } => Some(Compensation::DropDatabase { name: name.clone() }),
            Self::ReplaceDataset { .. }
            | Self::DropDatabase { .. }
            | Self::Verify
            | Self::VerifyDatabase { .. } => None,
        }
    }

    /// Returns true if the step destroys data that no compensation restores.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::ReplaceDataset { .. } | Self::DropDatabase { .. })
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReplaceDataset { database } => write!(f, "{} {}", self.phase(), database),
            Self::CreateDatabase { name }
            | Self::DropDatabase { name }
            | Self::VerifyDatabase { name, .. } => write!(f, "{} {}", self.phase(), name),
            _ => f.write_str(self.phase()),
        }
    }
}

/// The action that undoes a step.
///
/// A compensation only reverts what its step noted it was about to change,
/// so running it for a step that changed nothing is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "compensation", rename_all = "kebab-case")]
pub enum Compensation {
    /// Drop the replication user, if this operation created it.
    DropReplicationUser,

    /// Delete the snapshot payload and its catalog entry.
    PurgeSnapshot,

    /// Drop the databases the restore created on the replica, put back
    /// the replica's executed position and restart replication if it ran.
    UndoRestore,

    /// Put back the replica's previous replication source, or forget the
    /// source if it had none.
    DisarmReplication,

    /// Start replication again.
    ResumeReplication,

    /// Drop a database, if this operation created it.
    DropDatabase {
        /// Database name.
        name: String,
    },
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum StepOutcome {
    /// Not started.
    #[default]
    Pending,

    /// Started but not finished. Seen after a crash mid-step.
    Running,

    /// Finished and changed state.
    Completed,

    /// The step's precondition already held; nothing was changed.
    Skipped {
        /// Why the step was skipped.
        reason: String,
    },

    /// The step failed.
    Failed {
        /// The error that stopped the step.
        error: String,
    },

    /// The step's effect was undone.
    Compensated,

    /// Undoing the step failed.
    CompensationFailed {
        /// The error raised by the compensation.
        error: String,
    },
}

impl StepOutcome {
    /// Returns true if the step needs no further work on resume.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped { .. })
    }
}

/// A step together with its recorded outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// The step.
    pub step: Step,

    /// What happened.
    pub outcome: StepOutcome,

    /// When the step last started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the step last finished.
    pub finished_at: Option<DateTime<Utc>>,

    /// Values the step produced for later steps and for its compensation.
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl StepRecord {
    /// Creates a pending record.
    pub fn new(step: Step) -> Self {
        Self {
            step,
            outcome: StepOutcome::Pending,
            started_at: None,
            finished_at: None,
            details: BTreeMap::new(),
        }
    }
}

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationState {
    /// Created, not started.
    Pending,

    /// Executing steps.
    Running,

    /// A step failed; the operation can be resumed or rolled back.
    StepFailed,

    /// Completed steps were compensated in reverse order.
    RolledBack,

    /// All steps completed.
    Completed,
}

impl OperationState {
    /// Returns the name of this state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::StepFailed => "step-failed",
            Self::RolledBack => "rolled-back",
            Self::Completed => "completed",
        }
    }

    /// Returns true for states no run will leave.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::RolledBack | Self::Completed)
    }

    fn can_transition_to(self, next: OperationState) -> bool {
        use OperationState::*;
        matches!(
            (self, next),
            (Pending, Running)
                // A journal left `running` by a crashed process
                | (Running, Running)
                | (Running, StepFailed)
                | (Running, Completed)
                | (StepFailed, Running)
                | (StepFailed, RolledBack)
                | (StepFailed, StepFailed)
        )
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A named multi-step workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique identifier.
    pub id: OperationId,

    /// What the operation does.
    pub kind: OperationKind,

    /// Lifecycle state.
    pub state: OperationState,

    /// Ordered step records.
    pub steps: Vec<StepRecord>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last state change.
    pub updated_at: DateTime<Utc>,

    /// The error that moved the operation to `step-failed`.
    pub error: Option<String>,
}

impl Operation {
    /// Creates a pending operation with the kind's default plan.
    pub fn new(kind: OperationKind) -> Self {
        let steps = kind.plan().into_iter().map(StepRecord::new).collect();
        let now = Utc::now();
        Self {
            id: OperationId::new(),
            kind,
            state: OperationState::Pending,
            steps,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    fn transition(&mut self, next: OperationState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ModelError::invalid_transition(self.state, next));
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    fn record_mut(&mut self, index: usize) -> Result<&mut StepRecord> {
        self.steps.get_mut(index).ok_or(ModelError::NoSuchStep(index))
    }

    /// Moves a pending, failed or interrupted operation to running.
    ///
    /// Steps that were running or failed are reset to pending so they run
    /// again; completed and skipped steps are kept.
    pub fn start(&mut self) -> Result<()> {
        self.transition(OperationState::Running)?;
        self.error = None;
        for record in &mut self.steps {
            if matches!(
                record.outcome,
                StepOutcome::Running | StepOutcome::Failed { .. }
            ) {
                record.outcome = StepOutcome::Pending;
            }
        }
        Ok(())
    }

    /// Returns the index of the first step that still needs to run.
    pub fn next_step(&self) -> Option<usize> {
        self.steps.iter().position(|r| !r.outcome.is_done())
    }

    /// Returns the phase name of the operation.
    pub fn phase(&self) -> &'static str {
        match self.state {
            OperationState::Running => self
                .next_step()
                .map(|i| self.steps[i].step.phase())
                .unwrap_or("running"),
            other => other.name(),
        }
    }

    /// Marks a step as started.
    pub fn begin_step(&mut self, index: usize) -> Result<()> {
        let record = self.record_mut(index)?;
        record.outcome = StepOutcome::Running;
        record.started_at = Some(Utc::now());
        record.finished_at = None;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Marks a step as completed, merging the values it produced.
    pub fn complete_step(
        &mut self,
        index: usize,
        details: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        let record = self.record_mut(index)?;
        record.outcome = StepOutcome::Completed;
        record.finished_at = Some(Utc::now());
        record.details.extend(details);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Records a value on a step without changing its outcome.
    ///
    /// Steps note what they are about to change before changing it, so a
    /// compensation knows exactly what this operation did even when the
    /// step failed halfway.
    pub fn note_step(&mut self, index: usize, key: impl Into<String>, value: serde_json::Value) -> Result<()> {
        let record = self.record_mut(index)?;
        record.details.insert(key.into(), value);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Marks a step as skipped because its precondition already held.
    pub fn skip_step(&mut self, index: usize, reason: impl Into<String>) -> Result<()> {
        let record = self.record_mut(index)?;
        record.outcome = StepOutcome::Skipped {
            reason: reason.into(),
        };
        record.finished_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Marks a step as failed and the operation as `step-failed`.
    pub fn fail_step(&mut self, index: usize, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        let record = self.record_mut(index)?;
        record.outcome = StepOutcome::Failed {
            error: error.clone(),
        };
        record.finished_at = Some(Utc::now());
        self.error = Some(error);
        self.transition(OperationState::StepFailed)
    }

    /// Records the result of compensating a step.
    pub fn record_compensation(&mut self, index: usize, error: Option<String>) -> Result<()> {
        let record = self.record_mut(index)?;
        record.outcome = match error {
            None => StepOutcome::Compensated,
            Some(error) => StepOutcome::CompensationFailed { error },
        };
        record.finished_at = Some(Utc::now());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Marks the operation as completed.
    pub fn complete(&mut self) -> Result<()> {
        if let Some(index) = self.next_step() {
            return Err(ModelError::invalid_transition(
                format!("{} with {} unfinished", self.state, self.steps[index].step),
                OperationState::Completed,
            ));
        }
        self.transition(OperationState::Completed)
    }

    /// Marks the operation as rolled back.
    pub fn roll_back(&mut self) -> Result<()> {
        self.transition(OperationState::RolledBack)
    }

    /// Returns the indices of the steps a rollback compensates, newest
    /// first: every completed step plus the failed one, which may have
    /// applied part of its effect. Skipped steps changed nothing.
    pub fn steps_to_compensate(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, r)| {
                matches!(
                    r.outcome,
                    StepOutcome::Completed | StepOutcome::Failed { .. }
                )
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Returns the last step that completed or was skipped.
    pub fn last_good_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .take_while(|r| r.outcome.is_done())
            .last()
            .map(|r| &r.step)
    }

    /// Returns the failed step, if any.
    pub fn failed_step(&self) -> Option<&Step> {
        self.steps
            .iter()
            .find(|r| matches!(r.outcome, StepOutcome::Failed { .. }))
            .map(|r| &r.step)
    }

    /// Looks up a value produced by an earlier step.
    pub fn detail(&self, step: &Step, key: &str) -> Option<&serde_json::Value> {
        self.steps
            .iter()
            .find(|r| &r.step == step)
            .and_then(|r| r.details.get(key))
    }

    /// Returns true if any step has started.
    pub fn has_progress(&self) -> bool {
        self.steps
            .iter()
            .any(|r| !matches!(r.outcome, StepOutcome::Pending))
    }
}
