//! Shared fixture for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pairctl_core::{Credentials, Node, NodeAddress, NodeId, NodeRole, TopologyState};
use pairctl_history::StateDir;
use pairctl_orchestrator::backend::SimulatedExecutor;
use pairctl_orchestrator::{
    BackoffPolicy, LifecycleController, OrchestratorSettings, ProvisioningOrchestrator,
    ReplicationSettings,
};
use tempfile::TempDir;

pub const PRIMARY: NodeId = NodeId(1);
pub const REPLICA: NodeId = NodeId(2);
pub const REPL_USER: &str = "repl";

/// A primary on 127.0.0.1:3306 and a replica on 127.0.0.1:3307.
pub fn topology() -> TopologyState {
    let mut t = TopologyState::new("integration");
    t.add_node(Node::new(
        PRIMARY,
        "mysql-1",
        NodeRole::Primary,
        NodeAddress::new("127.0.0.1", 3306),
        Credentials::new("root", "rootpw"),
    ))
    .unwrap();
    t.add_node(Node::new(
        REPLICA,
        "mysql-2",
        NodeRole::Replica,
        NodeAddress::new("127.0.0.1", 3307),
        Credentials::new("root", "rootpw"),
    ))
    .unwrap();
    t
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        replication: ReplicationSettings {
            user: REPL_USER.to_string(),
            password: "replpw".to_string(),
            ..Default::default()
        },
        verification: BackoffPolicy::fixed(Duration::from_millis(5), Duration::from_millis(300)),
        rollback_on_failure: true,
    }
}

/// Simulated pair, state directory and orchestrator.
pub struct Fixture {
    pub topology: TopologyState,
    pub sim: Arc<SimulatedExecutor>,
    pub orchestrator: Arc<ProvisioningOrchestrator>,
    pub dir: TempDir,
}

impl Fixture {
    /// Fresh pair: empty servers, no replication.
    pub async fn fresh() -> Self {
        let topology = topology();
        let sim = SimulatedExecutor::new(&topology);
        Self::with(topology, sim, settings()).await
    }

    /// Pair that was already provisioned with `databases`.
    pub async fn provisioned(databases: &[&str]) -> Self {
        let topology = topology();
        let sim = SimulatedExecutor::provisioned(&topology, REPL_USER, databases).await;
        Self::with(topology, sim, settings()).await
    }

    pub async fn with(topology: TopologyState, sim: SimulatedExecutor, settings: OrchestratorSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sim = Arc::new(sim);
        let state_dir = StateDir::open(dir.path().join("state"), false).await.unwrap();
        let orchestrator = Arc::new(ProvisioningOrchestrator::new(sim.clone(), state_dir, settings));
        Self {
            topology,
            sim,
            orchestrator,
            dir,
        }
    }

    /// Topology as observed right now.
    pub async fn observe(&self) -> TopologyState {
        self.orchestrator.reader().refresh(self.topology.clone()).await
    }

    pub fn controller(&self, recovery: BackoffPolicy) -> LifecycleController {
        LifecycleController::new(self.orchestrator.clone(), recovery)
    }
}
