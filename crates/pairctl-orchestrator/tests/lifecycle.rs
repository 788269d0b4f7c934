//! Lifecycle Integration Tests
//!
//! Restart recovery with bounded backoff, and refresh-from-snapshot runs
//! that are interrupted and resumed.

use std::path::PathBuf;
use std::time::Duration;

use pairctl_core::{OperationId, OperationState, Step, StepOutcome};
use pairctl_orchestrator::{BackoffPolicy, OrchestratorError};

mod common;
use common::{Fixture, PRIMARY, REPLICA};

fn quick_recovery() -> BackoffPolicy {
    BackoffPolicy::exponential(Duration::from_millis(5), Duration::from_millis(20), 10)
}

fn write_dump(fx: &Fixture, name: &str) -> PathBuf {
    let path = fx.dir.path().join(name);
    std::fs::write(&path, "CREATE TABLE orders (id INT PRIMARY KEY);\nINSERT INTO orders VALUES (1);\n").unwrap();
    path
}

//
// Restart recovery
//

#[tokio::test]
async fn test_replica_restart_recovers() {
    let fx = Fixture::provisioned(&["shop"]).await;
    fx.sim.set_reconnect_polls(3).await;
    let controller = fx.controller(quick_recovery());

    let state = controller.recover(fx.observe().await, REPLICA, true).await.unwrap();

    assert!(state.link_for(REPLICA).unwrap().is_streaming());
    assert!(fx.orchestrator.locks().holder(REPLICA).unwrap().is_none());
    // Three connecting reads, then the streaming one.
    assert!(fx.sim.count("mysql-2", "show-replica-status").await >= 4);
}

#[tokio::test]
async fn test_recovery_gives_up_after_budget() {
    let fx = Fixture::provisioned(&["shop"]).await;
    fx.sim.set_reconnect_polls(100).await;
    let controller = fx.controller(BackoffPolicy::exponential(
        Duration::from_millis(1),
        Duration::from_millis(2),
        4,
    ));

    let err = controller
        .recover(fx.observe().await, REPLICA, true)
        .await
        .unwrap_err();
    match err {
        OrchestratorError::RecoveryTimeout { replica, attempts, .. } => {
            assert_eq!(replica, REPLICA);
            assert_eq!(attempts, 4);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(fx.orchestrator.locks().holder(REPLICA).unwrap().is_none());
}

#[tokio::test]
async fn test_primary_restart_waits_for_replicas() {
    let fx = Fixture::provisioned(&["shop"]).await;
    let controller = fx.controller(quick_recovery());

    let state = controller.recover(fx.observe().await, PRIMARY, true).await.unwrap();
    assert!(state.link_for(REPLICA).unwrap().is_streaming());
    assert!(fx.sim.count("mysql-1", "ping").await >= 1);
}

#[tokio::test]
async fn test_unreachable_primary_times_out() {
    let fx = Fixture::provisioned(&["shop"]).await;
    let state = fx.observe().await;
    fx.sim.set_reachable("mysql-1", false).await;

    let controller = fx.controller(BackoffPolicy::exponential(
        Duration::from_millis(1),
        Duration::from_millis(2),
        3,
    ));
    let err = controller.recover(state, PRIMARY, false).await.unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::RecoveryTimeout { replica, attempts: 3, .. } if replica == PRIMARY
    ));
}

#[tokio::test]
async fn test_restart_refused_while_replica_is_locked() {
    let fx = Fixture::provisioned(&["shop"]).await;
    let other = OperationId::new();
    let _guard = fx.orchestrator.locks().acquire(REPLICA, other).unwrap();

    let err = fx
        .controller(quick_recovery())
        .recover(fx.observe().await, REPLICA, true)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::OperationInProgress { .. }));
}

//
// Refresh
//

#[tokio::test]
async fn test_refresh_replaces_dataset_and_resyncs() {
    let fx = Fixture::provisioned(&["shop", "billing"]).await;
    let dump = write_dump(&fx, "shop.sql");
    let controller = fx.controller(quick_recovery());

    let outcome = controller
        .refresh(fx.observe().await, REPLICA, "shop", &dump)
        .await
        .unwrap();

    let op = outcome.operation.unwrap();
    assert_eq!(op.state, OperationState::Completed);
    assert!(outcome.state.link_for(REPLICA).unwrap().is_streaming());

    assert_eq!(fx.sim.count("mysql-1", "drop-database").await, 1);
    assert_eq!(fx.sim.count("mysql-1", "import").await, 1);
    assert_eq!(fx.sim.count("mysql-2", "restore").await, 1);

    let replica = fx.sim.state("mysql-2").await.unwrap();
    assert!(replica.databases.contains("shop"));
    assert!(replica.databases.contains("billing"));
}

#[tokio::test]
async fn test_refresh_resumes_after_pause() {
    let fx = Fixture::provisioned(&["shop"]).await;
    let dump = write_dump(&fx, "shop.sql");
    let controller = fx.controller(quick_recovery());

    fx.sim.fail_next("drop-database", 1).await;
    let err = controller
        .refresh(fx.observe().await, REPLICA, "shop", &dump)
        .await
        .unwrap_err();
    match &err {
        OrchestratorError::StepFailed { step, last_good, .. } => {
            assert_eq!(step, "replacing-dataset shop");
            assert_eq!(last_good.as_deref(), Some("pausing-replication"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // No rollback: replication stays paused until the refresh finishes.
    let ops = fx.orchestrator.operations().await.unwrap();
    assert_eq!(ops[0].state, OperationState::StepFailed);
    assert!(!fx.sim.state("mysql-2").await.unwrap().replica_running);

    let outcome = controller
        .refresh(fx.observe().await, REPLICA, "shop", &dump)
        .await
        .unwrap();
    let op = outcome.operation.unwrap();
    assert_eq!(op.id, ops[0].id);
    assert_eq!(op.state, OperationState::Completed);
    assert_eq!(fx.sim.count("mysql-1", "drop-database").await, 1);
    assert_eq!(fx.sim.count("mysql-2", "stop-replica").await, 3);
    assert!(outcome.state.link_for(REPLICA).unwrap().is_streaming());
}

#[tokio::test]
async fn test_refresh_resumed_after_replace_does_not_drop_again() {
    let fx = Fixture::provisioned(&["shop"]).await;
    let dump = write_dump(&fx, "shop.sql");
    let controller = fx.controller(quick_recovery());

    fx.sim.fail_next("dump", 1).await;
    let err = controller
        .refresh(fx.observe().await, REPLICA, "shop", &dump)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::StepFailed { ref step, .. } if step == "snapshotting"));

    // The dataset was already replaced; the new path is ignored and need
    // not exist.
    let elsewhere = fx.dir.path().join("moved.sql");
    let outcome = controller
        .refresh(fx.observe().await, REPLICA, "shop", &elsewhere)
        .await
        .unwrap();

    let op = outcome.operation.unwrap();
    assert_eq!(op.state, OperationState::Completed);
    let replace = Step::ReplaceDataset {
        database: "shop".into(),
    };
    let recorded = op.detail(&replace, "dump").and_then(|v| v.as_str()).unwrap();
    assert!(recorded.ends_with("shop.sql"));

    assert_eq!(fx.sim.count("mysql-1", "drop-database").await, 1);
    assert_eq!(fx.sim.count("mysql-1", "import").await, 1);
    assert_eq!(fx.sim.count("mysql-1", "dump").await, 1);
}

#[tokio::test]
async fn test_refresh_requires_dump_file() {
    let fx = Fixture::provisioned(&["shop"]).await;
    let missing = fx.dir.path().join("missing.sql");

    let err = fx
        .controller(quick_recovery())
        .refresh(fx.observe().await, REPLICA, "shop", &missing)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration(_)));

    // Nothing ran and nothing was journaled.
    assert!(fx.orchestrator.operations().await.unwrap().is_empty());
    assert_eq!(fx.sim.count("mysql-2", "stop-replica").await, 0);
}

#[tokio::test]
async fn test_refresh_of_primary_is_rejected() {
    let fx = Fixture::provisioned(&["shop"]).await;
    let dump = write_dump(&fx, "shop.sql");

    let err = fx
        .controller(quick_recovery())
        .refresh(fx.observe().await, PRIMARY, "shop", &dump)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Configuration(_)));
    assert!(fx
        .orchestrator
        .operations()
        .await
        .unwrap()
        .iter()
        .all(|op| op.steps.iter().all(|r| r.outcome == StepOutcome::Pending)));
}
