//! Topology state reader.
//!
//! Reads replication status from each node and folds it into a
//! [`TopologyState`]. Reading never changes anything on a node.

use std::collections::{BTreeMap, BTreeSet};

use pairctl_core::{
    LinkState, Node, NodeId, NodeRole, NodeStatus, PositionToken, ReplicationLink, TopologyState,
};
use tracing::{debug, info, warn};

use crate::backend::SharedExecutor;
use crate::command::{is_system_database, AdminCommand};
use crate::error::{OrchestratorError, Result};
use crate::retry::{poll_until, BackoffPolicy, PollOutcome};

/// Fields of `SHOW REPLICA STATUS` the reader uses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicaStatus {
    /// `Replica_IO_Running` / `Slave_IO_Running`.
    pub io_running: String,
    /// `Replica_SQL_Running` / `Slave_SQL_Running`.
    pub sql_running: String,
    /// `Source_Host` / `Master_Host`.
    pub source_host: String,
    /// `Source_Port` / `Master_Port`.
    pub source_port: Option<u16>,
    /// `Source_User` / `Master_User`.
    pub source_user: String,
    /// `Last_IO_Error`.
    pub last_io_error: String,
    /// `Last_SQL_Error`.
    pub last_sql_error: String,
    /// `Seconds_Behind_Source` / `Seconds_Behind_Master`; `NULL` maps to `None`.
    pub seconds_behind: Option<u64>,
    /// `Executed_Gtid_Set`.
    pub executed_gtid_set: String,
}

impl ReplicaStatus {
    /// Returns true if either replication thread is running or trying to.
    pub fn threads_running(&self) -> bool {
        matches!(self.io_running.as_str(), "Yes" | "Connecting") || self.sql_running == "Yes"
    }

    /// Maps the thread states to a link state.
    pub fn link_state(&self) -> LinkState {
        if !self.last_io_error.is_empty() || !self.last_sql_error.is_empty() {
            LinkState::Error
        } else if self.io_running == "Yes" && self.sql_running == "Yes" {
            LinkState::Streaming
        } else if self.io_running == "Connecting" {
            LinkState::Connecting
        } else {
            LinkState::Disconnected
        }
    }

    /// Returns the first non-empty replication error.
    pub fn last_error(&self) -> Option<&str> {
        [&self.last_io_error, &self.last_sql_error]
            .into_iter()
            .find(|e| !e.is_empty())
            .map(String::as_str)
    }
}

/// Parses vertical (`\G`) replica status output.
///
/// Returns `Ok(None)` for empty output (the node has no replication
/// source) and `Err` with a reason when the output is not a replica status
/// row. Both the current `Replica_*`/`Source_*` and the legacy
/// `Slave_*`/`Master_*` field names are accepted.
pub fn parse_replica_status(output: &str) -> std::result::Result<Option<ReplicaStatus>, String> {
    if output.trim().is_empty() {
        return Ok(None);
    }

    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut last_key: Option<String> = None;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("***") {
            continue;
        }

        let field = trimmed.split_once(':').filter(|(key, _)| {
            !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
        match field {
            Some((key, value)) => {
                fields.insert(key.to_string(), value.trim().to_string());
                last_key = Some(key.to_string());
            }
            // Long values such as GTID sets wrap onto continuation lines.
            None => {
                if let Some(value) = last_key.as_ref().and_then(|k| fields.get_mut(k)) {
                    value.push_str(trimmed);
                }
            }
        }
    }

    let get = |current: &str, legacy: &str| -> Option<String> {
        fields.get(current).or_else(|| fields.get(legacy)).cloned()
    };

    let io_running = get("Replica_IO_Running", "Slave_IO_Running")
        .ok_or_else(|| "no Replica_IO_Running or Slave_IO_Running field".to_string())?;
    let sql_running = get("Replica_SQL_Running", "Slave_SQL_Running")
        .ok_or_else(|| "no Replica_SQL_Running or Slave_SQL_Running field".to_string())?;

    let source_port = match get("Source_Port", "Master_Port") {
        Some(port) if !port.is_empty() => Some(
            port.parse()
                .map_err(|_| format!("invalid source port {:?}", port))?,
        ),
        _ => None,
    };
    let seconds_behind = get("Seconds_Behind_Source", "Seconds_Behind_Master")
        .and_then(|s| s.parse().ok());

    Ok(Some(ReplicaStatus {
        io_running,
        sql_running,
        source_host: get("Source_Host", "Master_Host").unwrap_or_default(),
        source_port,
        source_user: get("Source_User", "Master_User").unwrap_or_default(),
        last_io_error: fields.get("Last_IO_Error").cloned().unwrap_or_default(),
        last_sql_error: fields.get("Last_SQL_Error").cloned().unwrap_or_default(),
        seconds_behind,
        executed_gtid_set: fields.get("Executed_Gtid_Set").cloned().unwrap_or_default(),
    }))
}

/// Reads node and link status through a command executor.
#[derive(Clone)]
pub struct TopologyReader {
    executor: SharedExecutor,
}

impl TopologyReader {
    /// Creates a reader.
    pub fn new(executor: SharedExecutor) -> Self {
        Self { executor }
    }

    /// Returns the executor this reader uses.
    pub fn executor(&self) -> &SharedExecutor {
        &self.executor
    }

    /// Reads the replication link of one node.
    ///
    /// Returns `None` for a node without a replication source.
    pub async fn read_status(&self, state: &TopologyState, node: &Node) -> Result<Option<ReplicationLink>> {
        let Some(status) = self.read_replica_status(node).await? else {
            return Ok(None);
        };

        let primary = resolve_source(state, &status)?;
        let mut link = ReplicationLink::new(node.id, primary)
            .with_state(status.link_state())
            .with_position(PositionToken::new(&status.executed_gtid_set));
        link.lag_secs = status.seconds_behind;
        link.last_error = status.last_error().map(String::from);

        debug!(node = %node.name, state = %link.state, position = %link.position, "Read replica status");
        Ok(Some(link))
    }

    /// Reads the raw replica status of a node, `None` if it has no source.
    pub async fn read_replica_status(&self, node: &Node) -> Result<Option<ReplicaStatus>> {
        let output = self
            .executor
            .execute(node, &AdminCommand::ShowReplicaStatus)
            .await?;
        parse_replica_status(&output.stdout).map_err(|reason| OrchestratorError::parse(&node.name, reason))
    }

    /// Returns the application databases on a node.
    pub async fn databases(&self, node: &Node) -> Result<BTreeSet<String>> {
        let output = self.executor.execute(node, &AdminCommand::ShowDatabases).await?;
        Ok(output
            .stdout_lines()
            .into_iter()
            .filter(|name| !is_system_database(name))
            .map(String::from)
            .collect())
    }

    /// Observes every node and returns the updated topology.
    ///
    /// Nothing here fails the call: unreachable nodes are marked
    /// `Unreachable` and unreadable status output marks the node `Degraded`.
    pub async fn refresh(&self, mut state: TopologyState) -> TopologyState {
        let nodes: Vec<Node> = state.nodes().cloned().collect();

        for node in &nodes {
            let status = match self.executor.execute(node, &AdminCommand::Ping).await {
                Err(e) => {
                    warn!(node = %node.name, error = %e, "Node unreachable");
                    NodeStatus::Unreachable {
                        reason: e.to_string(),
                    }
                }
                Ok(_) if node.role == NodeRole::Primary => {
                    match self.databases(node).await {
                        Ok(databases) => state.databases = databases,
                        Err(e) => warn!(node = %node.name, error = %e, "Cannot list databases"),
                    }
                    NodeStatus::Online
                }
                Ok(_) => self.refresh_link(&mut state, node).await,
            };

            // Nodes come from `state` itself.
            let _ = state.set_status(node.id, status);
        }

        info!(
            topology = %state.name,
            nodes = state.node_count(),
            streaming = state.links().filter(|l| l.is_streaming()).count(),
            "Topology refreshed"
        );
        state
    }

    async fn refresh_link(&self, state: &mut TopologyState, node: &Node) -> NodeStatus {
        match self.read_status(state, node).await {
            Ok(Some(link)) => match state.set_link(link) {
                Ok(()) => NodeStatus::Online,
                Err(e) => NodeStatus::Degraded {
                    reason: e.to_string(),
                },
            },
            Ok(None) => {
                state.clear_link(node.id);
                NodeStatus::Online
            }
            Err(e @ OrchestratorError::Parse { .. }) => {
                warn!(node = %node.name, error = %e, "Unrecognized status output, marking node degraded");
                NodeStatus::Degraded {
                    reason: e.to_string(),
                }
            }
            Err(e @ OrchestratorError::Connection { .. }) => NodeStatus::Unreachable {
                reason: e.to_string(),
            },
            Err(e) => {
                warn!(node = %node.name, error = %e, "Cannot read replica status");
                NodeStatus::Degraded {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Polls a replica's link until `done` accepts it or the policy's
    /// budget runs out.
    ///
    /// Transient errors (unreachable node, unreadable status) keep polling;
    /// anything else ends the wait with that error.
    pub async fn wait_for<F>(
        &self,
        state: &TopologyState,
        replica: NodeId,
        policy: &BackoffPolicy,
        condition: &str,
        done: F,
    ) -> Result<PollOutcome<ReplicationLink>>
    where
        F: Fn(&ReplicationLink) -> bool,
    {
        let node = state.node(replica)?;
        let done = &done;

        poll_until(policy, condition, |attempt| async move {
            let link = self.read_status(state, node).await?;
            debug!(
                replica = %node.name,
                attempt = attempt + 1,
                state = link.as_ref().map(|l| l.state.name()).unwrap_or("none"),
                condition,
                "Polled replica"
            );
            Ok::<_, OrchestratorError>(link.filter(|l| done(l)))
        })
        .await
    }
}

/// Finds the node a replica's source host and port point at.
fn resolve_source(state: &TopologyState, status: &ReplicaStatus) -> Result<NodeId> {
    let host = status.source_host.as_str();
    let matched = state.nodes().find(|n| {
        let address_match = n.address.host == host && Some(n.address.port) == status.source_port;
        address_match || n.name == host || n.container_name() == host
    });

    match matched {
        Some(node) => Ok(node.id),
        None => {
            let primary = state.primary()?;
            debug!(
                source = %host,
                primary = %primary.name,
                "Source host does not match a node address, assuming the primary"
            );
            Ok(primary.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAMING: &str = "*************************** 1. row ***************************
             Replica_IO_State: Waiting for source to send event
                  Source_Host: mysql-primary
                  Source_User: repl
                  Source_Port: 3306
           Replica_IO_Running: Yes
          Replica_SQL_Running: Yes
                Last_IO_Error:
               Last_SQL_Error:
        Seconds_Behind_Source: 3
            Executed_Gtid_Set: 3e11fa47-71ca-11e1-9e33-c80aa9429562:1-77,
8f2d1c44-71ca-11e1-9e33-c80aa9429562:1-5
";

    const LEGACY_ERROR: &str = "*************************** 1. row ***************************
               Slave_IO_State:
                  Master_Host: 10.0.0.5
                  Master_Port: 3306
             Slave_IO_Running: No
            Slave_SQL_Running: Yes
                Last_IO_Error: error connecting to master 'repl@10.0.0.5:3306' - retry-time: 60
               Last_SQL_Error:
        Seconds_Behind_Master: NULL
";

    #[test]
    fn test_parse_streaming() {
        let status = parse_replica_status(STREAMING).unwrap().unwrap();
        assert_eq!(status.link_state(), LinkState::Streaming);
        assert_eq!(status.source_host, "mysql-primary");
        assert_eq!(status.source_port, Some(3306));
        assert_eq!(status.source_user, "repl");
        assert_eq!(status.seconds_behind, Some(3));
        assert_eq!(
            PositionToken::new(&status.executed_gtid_set).as_str(),
            "3e11fa47-71ca-11e1-9e33-c80aa9429562:1-77,8f2d1c44-71ca-11e1-9e33-c80aa9429562:1-5"
        );
    }

    #[test]
    fn test_parse_legacy_names_and_errors() {
        let status = parse_replica_status(LEGACY_ERROR).unwrap().unwrap();
        assert_eq!(status.link_state(), LinkState::Error);
        assert_eq!(status.seconds_behind, None);
        assert_eq!(status.source_user, "");
        assert!(status.last_error().unwrap().starts_with("error connecting"));
    }

    #[test]
    fn test_state_mapping() {
        let mut status = ReplicaStatus {
            io_running: "Connecting".into(),
            sql_running: "Yes".into(),
            ..Default::default()
        };
        assert_eq!(status.link_state(), LinkState::Connecting);

        assert!(status.threads_running());

        status.io_running = "No".into();
        assert_eq!(status.link_state(), LinkState::Disconnected);
        assert!(status.threads_running());

        status.sql_running = "No".into();
        assert!(!status.threads_running());
        status.sql_running = "Yes".into();

        status.last_sql_error = "Error 'Table exists' on query".into();
        assert_eq!(status.link_state(), LinkState::Error);
    }

    #[test]
    fn test_empty_output_means_no_link() {
        assert_eq!(parse_replica_status("").unwrap(), None);
        assert_eq!(parse_replica_status("\n  \n").unwrap(), None);
    }

    #[test]
    fn test_unrecognized_format() {
        let err = parse_replica_status("Channel_Name: \nService_State: ON\n").unwrap_err();
        assert!(err.contains("Replica_IO_Running"));
    }
}
