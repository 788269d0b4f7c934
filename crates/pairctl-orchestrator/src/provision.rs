//! Provisioning orchestrator.
//!
//! Drives an [`Operation`] through its steps against the pair. Before every
//! step transition the operation record is appended to the journal, so a
//! crashed or interrupted run resumes at the first step that did not finish.
//!
//! Every step is guarded by a precondition check or is idempotent. A guarded
//! step whose precondition already holds is recorded as skipped and is never
//! compensated. Before a step changes anything it notes in the journal what
//! it is about to change, and a compensation reverts only what was noted, so
//! state that existed before the operation is left alone. When a step fails,
//! operations that support rollback run the compensation of the failed step
//! and of every completed step, newest first. Verification timeouts are not rolled back: the operation stays
//! `step-failed` at its verification step and [`ProvisioningOrchestrator::verify`]
//! resumes it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pairctl_core::{
    Compensation, LinkState, Node, NodeId, NodeRole, Operation, OperationKind, OperationState,
    PositionToken, ReplicationLink, Snapshot, SnapshotId, Step, TopologyState,
};
use pairctl_history::{CompactionReport, Journal, LockInfo, LockManager, SnapshotStore, StateDir};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backend::{ExecOutput, SharedExecutor};
use crate::cancel::CancelSignal;
use crate::command::{dump_position, is_system_database, AdminCommand};
use crate::error::{OrchestratorError, Result};
use crate::retry::{poll_until, BackoffPolicy, PollOutcome};
use crate::status::TopologyReader;

/// Values a step records for later steps and for its compensation.
pub type Details = BTreeMap<String, Value>;

/// Replication account and source address used when arming a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSettings {
    /// Replication user created on the primary.
    pub user: String,

    /// Password of the replication user.
    pub password: String,

    /// Source host as the replica reaches it. Defaults to the primary's
    /// address; container deployments use the primary's service name.
    pub source_host: Option<String>,

    /// Source port as the replica reaches it.
    pub source_port: Option<u16>,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            user: "repl".to_string(),
            password: String::new(),
            source_host: None,
            source_port: None,
        }
    }
}

/// Orchestrator behavior.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Replication account and source address.
    pub replication: ReplicationSettings,

    /// Polling budget of verification steps.
    pub verification: BackoffPolicy,

    /// Compensate completed steps when a step fails.
    pub rollback_on_failure: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            replication: ReplicationSettings::default(),
            verification: BackoffPolicy::fixed(Duration::from_secs(1), Duration::from_secs(60)),
            rollback_on_failure: true,
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Topology observed after the run.
    pub state: TopologyState,

    /// The operation record, absent for a standalone verification.
    pub operation: Option<Operation>,
}

enum StepResult {
    Completed(Details),
    Skipped(String),
}

fn details<const N: usize>(pairs: [(&str, Value); N]) -> Details {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Sequences runbook operations against the pair.
pub struct ProvisioningOrchestrator {
    executor: SharedExecutor,
    reader: TopologyReader,
    journal: Arc<Mutex<Journal>>,
    snapshots: Arc<dyn SnapshotStore>,
    locks: LockManager,
    settings: OrchestratorSettings,
    cancel: CancelSignal,
}

impl ProvisioningOrchestrator {
    /// Creates an orchestrator persisting to `state_dir`.
    pub fn new(executor: SharedExecutor, state_dir: StateDir, settings: OrchestratorSettings) -> Self {
        Self {
            reader: TopologyReader::new(executor.clone()),
            executor,
            journal: Arc::new(Mutex::new(state_dir.journal)),
            snapshots: Arc::new(state_dir.snapshots),
            locks: state_dir.locks,
            settings,
            cancel: CancelSignal::new(),
        }
    }

    /// Uses `cancel` to stop runs between steps.
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the topology reader.
    pub fn reader(&self) -> &TopologyReader {
        &self.reader
    }

    /// Returns the command executor.
    pub fn executor(&self) -> &SharedExecutor {
        &self.executor
    }

    /// Returns the settings.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Returns the snapshot catalog.
    pub fn snapshots(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshots
    }

    /// Returns the replica locks.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Returns the latest record of every journaled operation, oldest first.
    pub async fn operations(&self) -> Result<Vec<Operation>> {
        Ok(self.journal.lock().await.operations().await?)
    }

    /// Compacts the journal, keeping the newest `keep_finished` finished operations.
    ///
    /// Refused while any replica lock is held, since a running operation in
    /// another process appends to the same file.
    pub async fn compact_journal(&self, keep_finished: usize) -> Result<CompactionReport> {
        if let Some(holder) = self.locks.live_holders()?.into_iter().next() {
            return Err(OrchestratorError::OperationInProgress {
                replica: holder.replica,
                operation: holder.operation,
            });
        }
        Ok(self.journal.lock().await.compact(keep_finished).await?)
    }

    /// Removes the lock of a replica left behind by a dead run.
    pub fn unlock(&self, replica: NodeId) -> Result<Option<LockInfo>> {
        Ok(self.locks.force_release(replica)?)
    }

    /// Provisions a replica from a fresh snapshot of the primary.
    pub async fn provision(&self, state: TopologyState, replica: NodeId) -> Result<RunOutcome> {
        replica_node(&state, replica)?;
        let op = self.start_or_resume(OperationKind::Provision { replica }).await?;
        self.run(state, op).await
    }

    /// Creates a database on the primary and waits for it on `replica`.
    pub async fn add_database(&self, state: TopologyState, replica: NodeId, name: &str) -> Result<RunOutcome> {
        replica_node(&state, replica)?;
        check_database_name(name)?;
        let op = self
            .start_or_resume(OperationKind::AddDatabase {
                replica,
                name: name.to_string(),
            })
            .await?;
        self.run(state, op).await
    }

    /// Drops a database on the primary and waits for it to vanish on `replica`.
    pub async fn remove_database(&self, state: TopologyState, replica: NodeId, name: &str) -> Result<RunOutcome> {
        replica_node(&state, replica)?;
        check_database_name(name)?;
        let op = self
            .start_or_resume(OperationKind::RemoveDatabase {
                replica,
                name: name.to_string(),
            })
            .await?;
        self.run(state, op).await
    }

    /// Resumes a verification that timed out, or checks that `replica`
    /// streams from the primary when nothing is pending.
    pub async fn verify(&self, state: TopologyState, replica: NodeId) -> Result<RunOutcome> {
        let node = replica_node(&state, replica)?.clone();

        let pending = self
            .operations()
            .await?
            .into_iter()
            .rev()
            .find(|op| {
                op.kind.replica() == replica
                    && op.state == OperationState::StepFailed
                    && matches!(
                        op.failed_step(),
                        Some(Step::Verify | Step::VerifyDatabase { .. })
                    )
            });
        if let Some(op) = pending {
            info!(operation = %op.id.short(), kind = %op.kind, "Resuming verification");
            return self.run(state, op).await;
        }

        let primary = state.primary()?.id;
        let condition = format!("{} streaming from primary", node.name);
        match self
            .reader
            .wait_for(&state, replica, &self.settings.verification, &condition, |link| {
                link.is_streaming() && link.primary == primary
            })
            .await?
        {
            PollOutcome::Ready(_) => Ok(RunOutcome {
                state: self.reader.refresh(state).await,
                operation: None,
            }),
            PollOutcome::Exhausted { attempts, elapsed } => Err(OrchestratorError::VerificationTimeout {
                replica,
                condition,
                attempts,
                elapsed_secs: elapsed.as_secs(),
            }),
        }
    }

    /// Returns the unfinished operation of `kind` from the journal, or a new one.
    pub async fn start_or_resume(&self, kind: OperationKind) -> Result<Operation> {
        let resumable = self.journal.lock().await.resumable(&kind).await?;
        match resumable {
            Some(op) => {
                info!(
                    operation = %op.id.short(),
                    kind = %op.kind,
                    state = %op.state,
                    phase = op.phase(),
                    "Resuming operation"
                );
                Ok(op)
            }
            None => Ok(Operation::new(kind)),
        }
    }

    /// Runs `op` to completion, starting at its first unfinished step.
    ///
    /// Holds the replica lock for the whole run; a second run against the
    /// same replica fails with [`OrchestratorError::OperationInProgress`].
    pub async fn run(&self, mut state: TopologyState, mut op: Operation) -> Result<RunOutcome> {
        let replica = op.kind.replica();
        let _guard = self.locks.acquire(replica, op.id)?;

        op.start()?;
        self.record(&op).await?;
        info!(operation = %op.id.short(), kind = %op.kind, "Operation started");

        while let Some(index) = op.next_step() {
            let step = op.steps[index].step.clone();

            if self.cancel.is_cancelled() {
                warn!(operation = %op.id.short(), step = %step, "Cancelled before step");
                op.fail_step(index, "cancelled by operator")?;
                self.record(&op).await?;
                return Err(OrchestratorError::Cancelled {
                    operation: op.id,
                    step: step.to_string(),
                });
            }

            op.begin_step(index)?;
            self.record(&op).await?;
            info!(operation = %op.id.short(), step = %step, "Step started");

            match self.execute_step(&mut state, &mut op, index, &step).await {
                Ok(StepResult::Completed(details)) => {
                    op.complete_step(index, details)?;
                    info!(operation = %op.id.short(), step = %step, "Step completed");
                }
                Ok(StepResult::Skipped(reason)) => {
                    info!(operation = %op.id.short(), step = %step, reason = %reason, "Step skipped");
                    op.skip_step(index, reason)?;
                }
                Err(e) => return Err(self.fail(&mut state, &mut op, index, e).await),
            }
            self.record(&op).await?;
        }

        op.complete()?;
        self.record(&op).await?;
        info!(operation = %op.id.short(), kind = %op.kind, "Operation completed");

        Ok(RunOutcome {
            state: self.reader.refresh(state).await,
            operation: Some(op),
        })
    }

    async fn record(&self, op: &Operation) -> Result<()> {
        self.journal.lock().await.append(op).await?;
        Ok(())
    }

    /// Journals values on the running step before it changes anything.
    async fn note(&self, op: &mut Operation, index: usize, notes: Details) -> Result<()> {
        for (key, value) in notes {
            op.note_step(index, key, value)?;
        }
        self.record(op).await
    }

    /// Marks the step failed, rolls back where allowed and wraps the error
    /// with step context.
    async fn fail(
        &self,
        state: &mut TopologyState,
        op: &mut Operation,
        index: usize,
        source: OrchestratorError,
    ) -> OrchestratorError {
        let step = op.steps[index].step.to_string();
        let last_good = op.last_good_step().map(|s| s.to_string());
        error!(operation = %op.id.short(), step = %step, error = %source, "Step failed");

        if let Err(e) = op.fail_step(index, source.to_string()) {
            return e.into();
        }
        if let Err(e) = self.record(op).await {
            warn!(operation = %op.id.short(), error = %e, "Cannot journal step failure");
        }

        let compensation_errors = if op.kind.rolls_back() && self.settings.rollback_on_failure && !source.is_timeout() {
            self.roll_back(state, op).await
        } else {
            Vec::new()
        };

        OrchestratorError::StepFailed {
            operation: op.id,
            step,
            last_good,
            source: Box::new(source),
            compensation_errors,
        }
    }

    /// Compensates the failed step and every completed step, newest first.
    ///
    /// Every compensation runs even when an earlier one fails. The operation
    /// is marked rolled back only if all of them succeeded; otherwise it
    /// stays `step-failed` and a rerun redoes the compensated steps.
    async fn roll_back(&self, state: &mut TopologyState, op: &mut Operation) -> Vec<String> {
        info!(operation = %op.id.short(), kind = %op.kind, "Rolling back");
        let mut errors = Vec::new();

        for index in op.steps_to_compensate() {
            let step = op.steps[index].step.clone();
            let Some(compensation) = step.compensation() else {
                continue;
            };

            let failure = match self.compensate(state, op, &compensation).await {
                Ok(()) => {
                    info!(operation = %op.id.short(), step = %step, "Step compensated");
                    None
                }
                Err(e) => {
                    warn!(operation = %op.id.short(), step = %step, error = %e, "Compensation failed");
                    Some(e.to_string())
                }
            };
            if let Some(e) = &failure {
                errors.push(format!("{}: {}", step, e));
            }
            if let Err(e) = op.record_compensation(index, failure) {
                errors.push(e.to_string());
            }
            if let Err(e) = self.record(op).await {
                errors.push(e.to_string());
            }
        }

        if errors.is_empty() {
            match op.roll_back() {
                Ok(()) => {
                    if let Err(e) = self.record(op).await {
                        errors.push(e.to_string());
                    }
                    info!(operation = %op.id.short(), "Operation rolled back");
                }
                Err(e) => errors.push(e.to_string()),
            }
        }
        errors
    }

    async fn compensate(&self, state: &mut TopologyState, op: &Operation, compensation: &Compensation) -> Result<()> {
        let primary = state.primary()?.clone();
        let replica = state.node(op.kind.replica())?.clone();

        match compensation {
            Compensation::DropReplicationUser => {
                if op.detail(&Step::CreateCredentials, "created_user") != Some(&Value::Bool(true)) {
                    return Ok(());
                }
                self.executor
                    .execute(
                        &primary,
                        &AdminCommand::DropUser {
                            user: self.settings.replication.user.clone(),
                        },
                    )
                    .await?;
            }
            Compensation::PurgeSnapshot => {
                if let Ok(id) = snapshot_id(op) {
                    self.snapshots.purge(id).await?;
                }
            }
            Compensation::UndoRestore => {
                let Some(position) = op.detail(&Step::Restore, "replaced_position").and_then(Value::as_str) else {
                    return Ok(());
                };
                self.executor.execute(&replica, &AdminCommand::StopReplica).await?;
                for name in string_list(op.detail(&Step::Restore, "created")) {
                    self.executor
                        .execute(&replica, &AdminCommand::DropDatabase { name })
                        .await?;
                }
                self.executor.execute(&replica, &AdminCommand::ResetBinaryLogs).await?;
                if !position.is_empty() {
                    self.executor
                        .execute(
                            &replica,
                            &AdminCommand::SetPurgedPosition {
                                position: position.to_string(),
                            },
                        )
                        .await?;
                }
                if op.detail(&Step::Restore, "replica_was_running") == Some(&Value::Bool(true)) {
                    self.executor.execute(&replica, &AdminCommand::StartReplica).await?;
                }
            }
            Compensation::DisarmReplication => {
                let Some(prior) = op.detail(&Step::ArmReplication, "prior_source") else {
                    return Ok(());
                };
                self.executor.execute(&replica, &AdminCommand::StopReplica).await?;
                match serde_json::from_value::<Option<PriorSource>>(prior.clone())? {
                    None => {
                        self.executor.execute(&replica, &AdminCommand::ResetReplicaAll).await?;
                        state.clear_link(replica.id);
                    }
                    Some(prior) => {
                        self.executor
                            .execute(
                                &replica,
                                &AdminCommand::ChangeSource {
                                    host: prior.host,
                                    port: prior.port,
                                    user: prior.user,
                                    password: self.settings.replication.password.clone(),
                                },
                            )
                            .await?;
                        if prior.running {
                            self.executor.execute(&replica, &AdminCommand::StartReplica).await?;
                        }
                    }
                }
            }
            Compensation::ResumeReplication => {
                self.executor.execute(&replica, &AdminCommand::StartReplica).await?;
            }
            Compensation::DropDatabase { name } => {
                let step = Step::CreateDatabase { name: name.clone() };
                if op.detail(&step, "created") != Some(&Value::Bool(true)) {
                    return Ok(());
                }
                self.executor
                    .execute(&primary, &AdminCommand::DropDatabase { name: name.clone() })
                    .await?;
                state.databases.remove(name);
            }
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        state: &mut TopologyState,
        op: &mut Operation,
        index: usize,
        step: &Step,
    ) -> Result<StepResult> {
        let primary = state.primary()?.clone();
        let replica = state.node(op.kind.replica())?.clone();

        match step {
            Step::CreateCredentials => self.create_credentials(op, index, &primary).await,
            Step::Snapshot => self.snapshot(state, op, &primary, &replica).await,
            Step::Restore => self.restore(state, op, index, &primary, &replica).await,
            Step::ArmReplication => self.arm_replication(state, op, index, &primary, &replica).await,
            Step::Verify => self.verify_streaming(state, &primary, &replica).await,
            Step::PauseReplication => self.pause_replication(state, &replica).await,
            Step::ReplaceDataset { database } => self.replace_dataset(op, step, &primary, database).await,
            Step::CreateDatabase { name } => {
                if self.reader.databases(&primary).await?.contains(name) {
                    return Ok(StepResult::Skipped(format!("database {} already exists", name)));
                }
                self.note(op, index, details([("created", json!(true))])).await?;
                self.executor
                    .execute(&primary, &AdminCommand::CreateDatabase { name: name.clone() })
                    .await?;
                state.databases.insert(name.clone());
                Ok(StepResult::Completed(details([("database", json!(name))])))
            }
            Step::DropDatabase { name } => {
                if !self.reader.databases(&primary).await?.contains(name) {
                    return Ok(StepResult::Skipped(format!("database {} does not exist", name)));
                }
                self.executor
                    .execute(&primary, &AdminCommand::DropDatabase { name: name.clone() })
                    .await?;
                state.databases.remove(name);
                Ok(StepResult::Completed(details([("database", json!(name))])))
            }
            Step::VerifyDatabase { name, present } => self.verify_database(&replica, name, *present).await,
        }
    }

    async fn create_credentials(&self, op: &mut Operation, index: usize, primary: &Node) -> Result<StepResult> {
        let user = &self.settings.replication.user;
        let exists = self
            .executor
            .execute(primary, &AdminCommand::UserExists { user: user.clone() })
            .await?;
        let created_earlier = op.steps[index].details.get("created_user") == Some(&Value::Bool(true));

        if exists.stdout.trim() == "1" {
            if !created_earlier {
                return Ok(StepResult::Skipped(format!("replication user {} already exists", user)));
            }
            // An earlier attempt of this operation created the user and
            // failed before the grant.
        } else {
            self.note(op, index, details([("created_user", json!(true))])).await?;
            self.executor
                .execute(
                    primary,
                    &AdminCommand::CreateUser {
                        user: user.clone(),
                        password: self.settings.replication.password.clone(),
                    },
                )
                .await?;
        }
        self.executor
            .execute(primary, &AdminCommand::GrantReplication { user: user.clone() })
            .await?;
        Ok(StepResult::Completed(details([("user", json!(user))])))
    }

    /// Returns true if the replica already streams from the primary.
    async fn streaming_from(&self, state: &TopologyState, primary: &Node, replica: &Node) -> Result<bool> {
        Ok(self
            .reader
            .read_status(state, replica)
            .await?
            .is_some_and(|link| link.is_streaming() && link.primary == primary.id))
    }

    async fn snapshot(&self, state: &TopologyState, op: &Operation, primary: &Node, replica: &Node) -> Result<StepResult> {
        if matches!(op.kind, OperationKind::Provision { .. }) && self.streaming_from(state, primary, replica).await? {
            return Ok(StepResult::Skipped(format!("{} already streams from {}", replica.name, primary.name)));
        }

        let databases: Vec<String> = self.reader.databases(primary).await?.into_iter().collect();
        let payload = if databases.is_empty() {
            // Nothing to export; the restore only carries the position.
            let position = self.executed_position(primary).await?;
            format!("SET @@GLOBAL.GTID_PURGED=/*!80000 '+'*/ '{}';\n", position).into_bytes()
        } else {
            self.executor
                .execute(
                    primary,
                    &AdminCommand::Dump {
                        databases: databases.clone(),
                    },
                )
                .await?
                .stdout
                .into_bytes()
        };

        let position = match dump_position(&payload) {
            Some(position) => position,
            None => PositionToken::new(self.executed_position(primary).await?),
        };

        let snapshot = Snapshot::new(primary.id, op.id, databases, position, PathBuf::new(), &payload);
        let snapshot = self.snapshots.store(snapshot, &payload).await?;
        info!(
            snapshot = %snapshot.id.short(),
            databases = snapshot.databases.len(),
            bytes = snapshot.size_bytes,
            position = %snapshot.position,
            "Snapshot taken"
        );

        Ok(StepResult::Completed(details([
            ("snapshot", json!(snapshot.id.to_string())),
            ("position", json!(snapshot.position.as_str())),
            ("databases", json!(snapshot.databases)),
        ])))
    }

    async fn executed_position(&self, node: &Node) -> Result<String> {
        let output: ExecOutput = self.executor.execute(node, &AdminCommand::ExecutedPosition).await?;
        Ok(output.stdout.trim().to_string())
    }

    async fn restore(
        &self,
        state: &TopologyState,
        op: &mut Operation,
        index: usize,
        primary: &Node,
        replica: &Node,
    ) -> Result<StepResult> {
        if matches!(op.kind, OperationKind::Provision { .. }) && self.streaming_from(state, primary, replica).await? {
            return Ok(StepResult::Skipped(format!("{} already streams from {}", replica.name, primary.name)));
        }

        let id = snapshot_id(op)?;
        let (snapshot, payload) = self.snapshots.read_payload(id).await?;
        self.snapshots.consume(id, op.id).await?;

        // Databases noted by an earlier attempt stay noted; they already
        // exist now but this operation created them.
        let existing = self.reader.databases(replica).await?;
        let mut created: BTreeSet<String> = string_list(op.steps[index].details.get("created")).into_iter().collect();
        created.extend(snapshot.databases.iter().filter(|d| !existing.contains(*d)).cloned());

        let mut notes = details([("created", json!(created))]);
        if !op.steps[index].details.contains_key("replaced_position") {
            let was_running = self
                .reader
                .read_replica_status(replica)
                .await?
                .is_some_and(|status| status.threads_running());
            notes.insert("replaced_position".to_string(), json!(self.executed_position(replica).await?));
            notes.insert("replica_was_running".to_string(), json!(was_running));
        }
        self.note(op, index, notes).await?;

        self.executor.execute(replica, &AdminCommand::StopReplica).await?;
        if let OperationKind::Refresh { database, .. } = &op.kind {
            self.executor
                .execute(
                    replica,
                    &AdminCommand::DropDatabase {
                        name: database.clone(),
                    },
                )
                .await?;
        }
        self.executor.execute(replica, &AdminCommand::ResetBinaryLogs).await?;
        self.executor.execute(replica, &AdminCommand::Restore { payload }).await?;

        let created: Vec<&String> = snapshot.databases.iter().filter(|d| !existing.contains(*d)).collect();
        info!(
            replica = %replica.name,
            snapshot = %snapshot.id.short(),
            created = created.len(),
            "Snapshot restored"
        );

        Ok(StepResult::Completed(details([
            ("snapshot", json!(snapshot.id.to_string())),
            ("created", json!(created)),
        ])))
    }

    async fn arm_replication(
        &self,
        state: &mut TopologyState,
        op: &mut Operation,
        index: usize,
        primary: &Node,
        replica: &Node,
    ) -> Result<StepResult> {
        if self.streaming_from(state, primary, replica).await? {
            return Ok(StepResult::Skipped(format!("{} already streams from {}", replica.name, primary.name)));
        }

        let replication = &self.settings.replication;
        let host = replication
            .source_host
            .clone()
            .unwrap_or_else(|| primary.address.host.clone());
        let port = replication.source_port.unwrap_or(primary.address.port);

        if !op.steps[index].details.contains_key("prior_source") {
            let prior = self.reader.read_replica_status(replica).await?.map(|status| PriorSource {
                running: status.threads_running(),
                host: status.source_host,
                port: status.source_port.unwrap_or(3306),
                user: status.source_user,
            });
            // Only a source using the replication account can be put back,
            // since its password is the one this run knows.
            if let Some(prior) = prior.as_ref().filter(|p| p.user != replication.user) {
                return Err(OrchestratorError::configuration(format!(
                    "{} already replicates from {}@{}:{}; reset its replication source first",
                    replica.name, prior.user, prior.host, prior.port
                )));
            }
            self.note(op, index, details([("prior_source", serde_json::to_value(&prior)?)]))
                .await?;
        }

        self.executor.execute(replica, &AdminCommand::StopReplica).await?;
        self.executor
            .execute(
                replica,
                &AdminCommand::ChangeSource {
                    host: host.clone(),
                    port,
                    user: replication.user.clone(),
                    password: replication.password.clone(),
                },
            )
            .await?;
        self.executor.execute(replica, &AdminCommand::StartReplica).await?;

        state.set_link(ReplicationLink::new(replica.id, primary.id).with_state(LinkState::Connecting))?;
        info!(replica = %replica.name, source = %format!("{}:{}", host, port), "Replication armed");

        Ok(StepResult::Completed(details([
            ("source_host", json!(host)),
            ("source_port", json!(port)),
        ])))
    }

    async fn verify_streaming(&self, state: &mut TopologyState, primary: &Node, replica: &Node) -> Result<StepResult> {
        let condition = format!("{} streaming from {}", replica.name, primary.name);
        let primary_id = primary.id;

        match self
            .reader
            .wait_for(state, replica.id, &self.settings.verification, &condition, |link| {
                link.is_streaming() && link.primary == primary_id
            })
            .await?
        {
            PollOutcome::Ready(link) => {
                let result = details([
                    ("position", json!(link.position.as_str())),
                    ("lag_secs", json!(link.lag_secs)),
                ]);
                state.set_link(link)?;
                Ok(StepResult::Completed(result))
            }
            PollOutcome::Exhausted { attempts, elapsed } => Err(OrchestratorError::VerificationTimeout {
                replica: replica.id,
                condition,
                attempts,
                elapsed_secs: elapsed.as_secs(),
            }),
        }
    }

    async fn pause_replication(&self, state: &mut TopologyState, replica: &Node) -> Result<StepResult> {
        match self.reader.read_status(state, replica).await? {
            None => Ok(StepResult::Skipped(format!("{} has no replication source", replica.name))),
            Some(link) if link.state == LinkState::Disconnected => {
                Ok(StepResult::Skipped(format!("replication on {} is already stopped", replica.name)))
            }
            Some(link) => {
                self.executor.execute(replica, &AdminCommand::StopReplica).await?;
                let position = link.position.as_str().to_string();
                state.set_link(link.with_state(LinkState::Disconnected))?;
                Ok(StepResult::Completed(details([("position", json!(position))])))
            }
        }
    }

    async fn replace_dataset(&self, op: &Operation, step: &Step, primary: &Node, database: &str) -> Result<StepResult> {
        let path = op
            .detail(step, "dump")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .ok_or_else(|| OrchestratorError::configuration(format!("no dump file recorded for {}", database)))?;

        // Read before dropping so a missing file leaves the database alone.
        let payload = tokio::fs::read(&path).await.map_err(|e| {
            OrchestratorError::configuration(format!("cannot read dump {}: {}", path.display(), e))
        })?;

        self.executor
            .execute(
                primary,
                &AdminCommand::DropDatabase {
                    name: database.to_string(),
                },
            )
            .await?;
        self.executor
            .execute(
                primary,
                &AdminCommand::CreateDatabase {
                    name: database.to_string(),
                },
            )
            .await?;
        let bytes = payload.len();
        self.executor
            .execute(
                primary,
                &AdminCommand::Import {
                    database: database.to_string(),
                    payload,
                },
            )
            .await?;
        info!(primary = %primary.name, database, bytes, "Dataset replaced");

        Ok(StepResult::Completed(details([("bytes", json!(bytes))])))
    }

    async fn verify_database(&self, replica: &Node, name: &str, present: bool) -> Result<StepResult> {
        let condition = format!(
            "database {} {} on {}",
            name,
            if present { "present" } else { "absent" },
            replica.name
        );
        let reader = &self.reader;

        match poll_until(&self.settings.verification, &condition, |_| async move {
            let databases = reader.databases(replica).await?;
            Ok::<_, OrchestratorError>((databases.contains(name) == present).then_some(()))
        })
        .await?
        {
            PollOutcome::Ready(()) => Ok(StepResult::Completed(Details::new())),
            PollOutcome::Exhausted { attempts, elapsed } => Err(OrchestratorError::VerificationTimeout {
                replica: replica.id,
                condition,
                attempts,
                elapsed_secs: elapsed.as_secs(),
            }),
        }
    }
}

/// Replication source a replica had before it was armed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PriorSource {
    host: String,
    port: u16,
    user: String,
    running: bool,
}

/// Returns the node if it is a replica of the topology.
pub(crate) fn replica_node(state: &TopologyState, replica: NodeId) -> Result<&Node> {
    let node = state.node(replica)?;
    if node.role != NodeRole::Replica {
        return Err(OrchestratorError::configuration(format!("{} is not a replica", node.name)));
    }
    Ok(node)
}

fn check_database_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.len() > 64 {
        return Err(OrchestratorError::configuration(format!("invalid database name '{}'", name)));
    }
    if is_system_database(name) {
        return Err(OrchestratorError::configuration(format!("{} is a system database", name)));
    }
    Ok(())
}

fn snapshot_id(op: &Operation) -> Result<SnapshotId> {
    op.detail(&Step::Snapshot, "snapshot")
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| OrchestratorError::configuration(format!("operation {} recorded no snapshot", op.id.short())))
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedExecutor;
    use pairctl_core::{Credentials, NodeAddress, StepOutcome};

    fn topology() -> TopologyState {
        let mut t = TopologyState::new("unit");
        t.add_node(Node::new(
            NodeId(1),
            "mysql-1",
            NodeRole::Primary,
            NodeAddress::new("10.0.0.1", 3306),
            Credentials::new("root", "pw"),
        ))
        .unwrap();
        t.add_node(Node::new(
            NodeId(2),
            "mysql-2",
            NodeRole::Replica,
            NodeAddress::new("10.0.0.2", 3306),
            Credentials::new("root", "pw"),
        ))
        .unwrap();
        t
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            replication: ReplicationSettings {
                password: "secret".into(),
                ..Default::default()
            },
            verification: BackoffPolicy::fixed(Duration::from_millis(5), Duration::from_millis(200)),
            rollback_on_failure: true,
        }
    }

    async fn orchestrator(sim: Arc<SimulatedExecutor>, dir: &std::path::Path) -> ProvisioningOrchestrator {
        let state_dir = StateDir::open(dir, false).await.unwrap();
        ProvisioningOrchestrator::new(sim, state_dir, settings())
    }

    #[test]
    fn test_database_name_checks() {
        assert!(check_database_name("shop").is_ok());
        assert!(check_database_name("").is_err());
        assert!(check_database_name("mysql").is_err());
        assert!(check_database_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_string_list() {
        assert_eq!(string_list(Some(&json!(["a", "b"]))), vec!["a", "b"]);
        assert!(string_list(Some(&json!("a"))).is_empty());
        assert!(string_list(None).is_empty());
    }

    #[tokio::test]
    async fn test_provision_rejects_primary() {
        let temp_dir = tempfile::tempdir().unwrap();
        let t = topology();
        let sim = Arc::new(SimulatedExecutor::new(&t));
        let orch = orchestrator(sim, temp_dir.path()).await;

        let err = orch.provision(t, NodeId(1)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_add_database_skips_existing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let t = topology();
        let sim = Arc::new(SimulatedExecutor::provisioned(&t, "repl", &["shop"]).await);
        let orch = orchestrator(sim.clone(), temp_dir.path()).await;

        let outcome = orch.add_database(t, NodeId(2), "shop").await.unwrap();
        let op = outcome.operation.unwrap();
        assert_eq!(op.state, OperationState::Completed);
        assert!(matches!(op.steps[0].outcome, StepOutcome::Skipped { .. }));
        assert_eq!(sim.count("mysql-1", "create-database").await, 0);
    }

    #[tokio::test]
    async fn test_cancel_stops_before_first_step() {
        let temp_dir = tempfile::tempdir().unwrap();
        let t = topology();
        let sim = Arc::new(SimulatedExecutor::new(&t));
        let cancel = CancelSignal::new();
        let orch = orchestrator(sim.clone(), temp_dir.path()).await.with_cancel(cancel.clone());

        cancel.cancel();
        let err = orch.provision(t, NodeId(2)).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Cancelled { .. }));
        assert!(sim.history().await.is_empty());

        let ops = orch.operations().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].state, OperationState::StepFailed);
    }
}
