//! Text rendering of command results.
//!
//! `--json` output serializes the model types directly; everything here is
//! the plain-text form.

use std::fmt::Write;

use pairctl_core::{NodeId, NodeStatus, Operation, Snapshot, StepOutcome, TopologyState};
use pairctl_history::{CompactionReport, LockInfo};

fn node_name(state: &TopologyState, id: NodeId) -> String {
    state
        .node(id)
        .map(|n| n.name.clone())
        .unwrap_or_else(|_| id.to_string())
}

/// Renders nodes, links and databases of a topology.
pub fn topology_table(state: &TopologyState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "topology: {}", state.name);
    let _ = writeln!(out, "{:<20} {:<8} {:<22} {}", "NODE", "ROLE", "ADDRESS", "STATUS");
    for node in state.nodes() {
        let _ = writeln!(
            out,
            "{:<20} {:<8} {:<22} {}",
            node.name,
            node.role,
            node.address.to_string(),
            node.status.label()
        );
    }

    let problems: Vec<_> = state
        .nodes()
        .filter_map(|n| match &n.status {
            NodeStatus::Degraded { reason } | NodeStatus::Unreachable { reason } => Some((&n.name, reason)),
            _ => None,
        })
        .collect();
    for (name, reason) in problems {
        let _ = writeln!(out, "  {}: {}", name, reason);
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "{:<20} {:<20} {:<13} {:<6} {}", "REPLICA", "SOURCE", "LINK", "LAG", "POSITION");
    for replica in state.replicas() {
        let Some(link) = state.link_for(replica.id) else {
            let _ = writeln!(out, "{:<20} {:<20} {:<13} {:<6} -", replica.name, "-", "none", "-");
            continue;
        };
        let lag = link.lag_secs.map(|s| format!("{}s", s)).unwrap_or_else(|| "-".to_string());
        let position = if link.position.is_empty() {
            "-"
        } else {
            link.position.as_str()
        };
        let _ = writeln!(
            out,
            "{:<20} {:<20} {:<13} {:<6} {}",
            replica.name,
            node_name(state, link.primary),
            link.state,
            lag,
            position
        );
        if let Some(error) = &link.last_error {
            let _ = writeln!(out, "  {}: {}", replica.name, error);
        }
    }
    if state.replicas().next().is_none() {
        let _ = writeln!(out, "(no replicas)");
    }

    let _ = writeln!(out);
    let databases: Vec<&str> = state.databases.iter().map(String::as_str).collect();
    let _ = writeln!(
        out,
        "databases: {}",
        if databases.is_empty() {
            "(none)".to_string()
        } else {
            databases.join(", ")
        }
    );
    out
}

fn outcome_label(outcome: &StepOutcome) -> (&'static str, &str) {
    match outcome {
        StepOutcome::Pending => ("pending", ""),
        StepOutcome::Running => ("running", ""),
        StepOutcome::Completed => ("completed", ""),
        StepOutcome::Skipped { reason } => ("skipped", reason),
        StepOutcome::Failed { error } => ("failed", error),
        StepOutcome::Compensated => ("compensated", ""),
        StepOutcome::CompensationFailed { error } => ("compensation-failed", error),
    }
}

/// Renders one operation and the outcome of each of its steps.
pub fn operation_summary(op: &Operation) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "operation {} ({}): {}", op.id.short(), op.kind, op.state);
    for record in &op.steps {
        let (label, detail) = outcome_label(&record.outcome);
        let _ = writeln!(out, "  {:<28} {:<20} {}", record.step.to_string(), label, detail);
    }
    out
}

/// Renders the journal listing, newest last.
pub fn operations_table(operations: &[Operation]) -> String {
    if operations.is_empty() {
        return "no operations recorded\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{:<10} {:<34} {:<22} {}", "ID", "KIND", "PHASE", "UPDATED");
    for op in operations {
        let _ = writeln!(
            out,
            "{:<10} {:<34} {:<22} {}",
            op.id.short(),
            op.kind.to_string(),
            op.phase(),
            op.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    out
}

/// Describes a journal compaction.
pub fn compaction(report: &CompactionReport) -> String {
    format!(
        "journal compacted: {} entries -> {}, {} finished operations dropped\n",
        report.entries_before, report.entries_after, report.operations_dropped
    )
}

/// Renders the snapshot catalog.
pub fn snapshots_table(snapshots: &[Snapshot]) -> String {
    if snapshots.is_empty() {
        return "no snapshots stored\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "{:<38} {:<10} {:<10} {:<20} {}", "ID", "BYTES", "RESTORED", "CREATED", "DATABASES");
    for snapshot in snapshots {
        let _ = writeln!(
            out,
            "{:<38} {:<10} {:<10} {:<20} {}",
            snapshot.id.to_string(),
            snapshot.size_bytes,
            if snapshot.is_consumed() { "yes" } else { "no" },
            snapshot.created_at.format("%Y-%m-%d %H:%M:%S"),
            snapshot.databases.join(",")
        );
    }
    out
}

/// Describes a released lock.
pub fn released_lock(state: &TopologyState, replica: NodeId, lock: Option<&LockInfo>) -> String {
    let name = node_name(state, replica);
    match lock {
        Some(info) => format!(
            "released lock on {} held by operation {} (pid {} on {})\n",
            name,
            info.operation.short(),
            info.pid,
            info.host
        ),
        None => format!("{} was not locked\n", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairctl_core::{
        Credentials, LinkState, Node, NodeAddress, NodeRole, OperationKind, PositionToken, ReplicationLink,
    };

    fn state() -> TopologyState {
        let mut t = TopologyState::new("shop");
        for (id, name, role, port) in [
            (1, "mysql-primary", NodeRole::Primary, 3306),
            (2, "mysql-replica", NodeRole::Replica, 3307),
        ] {
            t.add_node(Node::new(
                NodeId(id),
                name,
                role,
                NodeAddress::new("127.0.0.1", port),
                Credentials::new("root", "pw"),
            ))
            .unwrap();
        }
        t
    }

    #[test]
    fn test_topology_table_shows_link() {
        let mut t = state();
        t.databases.insert("shop".to_string());
        t.set_link(
            ReplicationLink::new(NodeId(2), NodeId(1))
                .with_state(LinkState::Streaming)
                .with_position(PositionToken::new("abc:1-7")),
        )
        .unwrap();
        t.set_status(
            NodeId(2),
            NodeStatus::Degraded {
                reason: "odd output".into(),
            },
        )
        .unwrap();

        let table = topology_table(&t);
        assert!(table.contains("streaming"));
        assert!(table.contains("abc:1-7"));
        assert!(table.contains("mysql-replica: odd output"));
        assert!(table.contains("databases: shop"));
        assert!(!table.contains("pw"));
    }

    #[test]
    fn test_topology_table_without_link() {
        let table = topology_table(&state());
        assert!(table.contains("none"));
        assert!(table.contains("databases: (none)"));
    }

    #[test]
    fn test_operation_summary_lists_steps() {
        let mut op = Operation::new(OperationKind::Provision { replica: NodeId(2) });
        op.start().unwrap();
        op.skip_step(0, "replication user repl already exists").unwrap();
        op.fail_step(1, "dump failed").unwrap();

        let summary = operation_summary(&op);
        assert!(summary.contains("step-failed"));
        assert!(summary.contains("already exists"));
        assert!(summary.contains("dump failed"));
        assert_eq!(summary.lines().count(), 1 + op.steps.len());
    }

    #[test]
    fn test_empty_listings() {
        assert_eq!(operations_table(&[]), "no operations recorded\n");
        assert_eq!(snapshots_table(&[]), "no snapshots stored\n");
        assert!(released_lock(&state(), NodeId(2), None).contains("mysql-replica was not locked"));
    }
}
