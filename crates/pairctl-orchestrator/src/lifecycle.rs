//! Lifecycle controller.
//!
//! Restart recovery and refresh-from-snapshot. Recovery polls with bounded
//! backoff and gives up with [`OrchestratorError::RecoveryTimeout`]; refresh
//! is a journaled [`Operation`] that resumes past its completed steps, so
//! the primary's database is dropped and recreated at most once per refresh.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pairctl_core::{Node, NodeId, Operation, OperationId, OperationKind, Step, TopologyState};
use pairctl_history::LockGuard;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::command::AdminCommand;
use crate::error::{OrchestratorError, Result};
use crate::provision::{replica_node, ProvisioningOrchestrator, RunOutcome};
use crate::retry::{poll_until, BackoffPolicy, PollOutcome};

/// Restart recovery and refresh on top of a [`ProvisioningOrchestrator`].
pub struct LifecycleController {
    orchestrator: Arc<ProvisioningOrchestrator>,
    recovery: BackoffPolicy,
}

impl LifecycleController {
    /// Creates a controller. `recovery` bounds every recovery wait.
    pub fn new(orchestrator: Arc<ProvisioningOrchestrator>, recovery: BackoffPolicy) -> Self {
        Self { orchestrator, recovery }
    }

    /// Returns the orchestrator.
    pub fn orchestrator(&self) -> &Arc<ProvisioningOrchestrator> {
        &self.orchestrator
    }

    /// Returns the recovery policy.
    pub fn recovery_policy(&self) -> &BackoffPolicy {
        &self.recovery
    }

    /// Waits for a node to come back after a restart, restarting it first
    /// when `restart` is set.
    ///
    /// For a replica this waits until its link streams again. For the
    /// primary it waits until the primary accepts connections and then
    /// until every replica streams. The affected replicas are locked while
    /// a restart is performed.
    pub async fn recover(&self, state: TopologyState, node: NodeId, restart: bool) -> Result<TopologyState> {
        let target = state.node(node)?.clone();
        let replicas: Vec<NodeId> = if target.is_primary() {
            state.replicas().map(|n| n.id).collect()
        } else {
            vec![target.id]
        };

        let _guards = if restart {
            let guards = self.lock_all(&replicas)?;
            info!(node = %target.name, "Restarting node");
            self.orchestrator.executor().restart(&target).await?;
            guards
        } else {
            Vec::new()
        };

        if target.is_primary() {
            self.wait_accepting(&target).await?;
        }
        for replica in &replicas {
            self.wait_streaming(&state, *replica).await?;
        }

        info!(node = %target.name, "Recovered");
        Ok(self.orchestrator.reader().refresh(state).await)
    }

    fn lock_all(&self, replicas: &[NodeId]) -> Result<Vec<LockGuard>> {
        // Restarts are not journaled; the id only marks the lock holder.
        let holder = OperationId::new();
        let mut guards = Vec::with_capacity(replicas.len());
        for replica in replicas {
            guards.push(self.orchestrator.locks().acquire(*replica, holder)?);
        }
        Ok(guards)
    }

    async fn wait_accepting(&self, node: &Node) -> Result<()> {
        let executor = self.orchestrator.executor();
        let condition = format!("{} accepting connections", node.name);

        match poll_until(&self.recovery, &condition, |_| async move {
            executor.execute(node, &AdminCommand::Ping).await.map(|_| Some(()))
        })
        .await?
        {
            PollOutcome::Ready(()) => Ok(()),
            PollOutcome::Exhausted { attempts, elapsed } => Err(recovery_timeout(node.id, attempts, elapsed)),
        }
    }

    async fn wait_streaming(&self, state: &TopologyState, replica: NodeId) -> Result<()> {
        let node = state.node(replica)?;
        let primary = state.primary()?.id;
        let condition = format!("{} streaming after restart", node.name);

        match self
            .orchestrator
            .reader()
            .wait_for(state, replica, &self.recovery, &condition, |link| {
                link.is_streaming() && link.primary == primary
            })
            .await?
        {
            PollOutcome::Ready(link) => {
                info!(replica = %node.name, position = %link.position, "Replica streaming");
                Ok(())
            }
            PollOutcome::Exhausted { attempts, elapsed } => {
                warn!(replica = %node.name, attempts, "Replica did not recover, manual intervention required");
                Err(recovery_timeout(replica, attempts, elapsed))
            }
        }
    }

    /// Replaces `database` on the primary from `dump` and resynchronizes
    /// `replica` from a fresh snapshot.
    ///
    /// An unfinished refresh of the same database is resumed. Its dump path
    /// is updated to `dump` unless the dataset was already replaced.
    pub async fn refresh(
        &self,
        state: TopologyState,
        replica: NodeId,
        database: &str,
        dump: &Path,
    ) -> Result<RunOutcome> {
        replica_node(&state, replica)?;
        let kind = OperationKind::Refresh {
            replica,
            database: database.to_string(),
        };
        let mut op = self.orchestrator.start_or_resume(kind).await?;
        attach_dump(&mut op, dump)?;
        self.orchestrator.run(state, op).await
    }
}

/// Records the dump path on the replace step of a refresh.
fn attach_dump(op: &mut Operation, dump: &Path) -> Result<()> {
    let Some(record) = op
        .steps
        .iter_mut()
        .find(|r| matches!(r.step, Step::ReplaceDataset { .. }))
    else {
        return Ok(());
    };

    if record.outcome.is_done() {
        let recorded = record.details.get("dump").and_then(Value::as_str).unwrap_or("-");
        if Path::new(recorded) != dump {
            warn!(
                recorded,
                requested = %dump.display(),
                "Dataset already replaced from an earlier dump, ignoring the new one"
            );
        }
        return Ok(());
    }

    if !dump.is_file() {
        return Err(OrchestratorError::configuration(format!(
            "dump file {} does not exist",
            dump.display()
        )));
    }
    let dump = dump.canonicalize()?;
    record
        .details
        .insert("dump".to_string(), json!(dump.to_string_lossy()));
    Ok(())
}

fn recovery_timeout(replica: NodeId, attempts: u32, elapsed: Duration) -> OrchestratorError {
    OrchestratorError::RecoveryTimeout {
        replica,
        attempts,
        elapsed_secs: elapsed.as_secs(),
    }
}
