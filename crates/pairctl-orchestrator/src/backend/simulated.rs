//! In-memory simulation of a primary/replica pair.
//!
//! The simulation keeps users, grants, databases, the executed GTID count
//! and the replication configuration of every node, and answers
//! [`AdminCommand`]s the way a server would, including realistic client
//! error output. Replication is modelled coarsely: a replica whose threads
//! run against a reachable source with a valid replication user mirrors the
//! source's databases and position.
//!
//! Faults can be injected for tests and dry runs: unreachable nodes,
//! rejected credentials, failing command kinds, replicas that never
//! connect, slow reconnection after restart, and unreadable status output.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use pairctl_core::{Node, NodeRole, TopologyState};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::r#trait::{classify_output, CommandExecutor, ExecOutput};
use crate::command::{dump_databases, dump_position, quote_ident, AdminCommand, SYSTEM_DATABASES};
use crate::error::Result;

/// Replication source configured on a simulated node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedSource {
    /// Source host.
    pub host: String,
    /// Source port.
    pub port: u16,
    /// Replication user.
    pub user: String,
}

/// Observable state of one simulated server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedState {
    /// Server UUID, used in GTID sets.
    pub server_uuid: String,
    /// Users created on the server.
    pub users: BTreeSet<String>,
    /// Users holding replication grants.
    pub replication_grants: BTreeSet<String>,
    /// Application databases.
    pub databases: BTreeSet<String>,
    /// Number of executed transactions.
    pub transactions: u64,
    /// GTID set of the last restored dump.
    pub purged: Option<String>,
    /// Replication source, when configured.
    pub source: Option<SimulatedSource>,
    /// Whether the replication threads run.
    pub replica_running: bool,
    /// Status reads left before a restarted replica reconnects.
    pub reconnect_polls: u32,
}

impl SimulatedState {
    fn gtid_executed(&self) -> String {
        if self.transactions == 0 {
            self.purged.clone().unwrap_or_default()
        } else {
            format!("{}:1-{}", self.server_uuid, self.transactions)
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    nodes: BTreeMap<String, SimulatedState>,
    addresses: BTreeMap<(String, u16), String>,
    unreachable: BTreeSet<String>,
    auth_rejected: BTreeSet<String>,
    garbled_status: BTreeSet<String>,
    stalled: BTreeSet<String>,
    failures: BTreeMap<String, u32>,
    late_failures: BTreeMap<String, u32>,
    reconnect_polls_after_restart: u32,
    log: Vec<(String, &'static str)>,
}

/// Stream health of a simulated replica.
enum Stream {
    Streaming,
    Connecting,
    Failing(String),
    Stopped,
}

impl Inner {
    fn resolve_source(&self, source: &SimulatedSource) -> Option<&str> {
        self.addresses
            .get(&(source.host.clone(), source.port))
            .map(String::as_str)
    }

    fn stream(&self, name: &str) -> Option<Stream> {
        let state = self.nodes.get(name)?;
        let source = state.source.as_ref()?;

        if !state.replica_running {
            return Some(Stream::Stopped);
        }
        if state.reconnect_polls > 0 || self.stalled.contains(name) {
            return Some(Stream::Connecting);
        }

        let Some(source_name) = self.resolve_source(source) else {
            return Some(Stream::Failing(format!(
                "error connecting to source '{}@{}:{}' - retry-time: 60 retries: 1 message: \
                 Unknown MySQL server host '{}'",
                source.user, source.host, source.port, source.host
            )));
        };
        if self.unreachable.contains(source_name) {
            return Some(Stream::Connecting);
        }

        let source_state = self.nodes.get(source_name)?;
        if !source_state.users.contains(&source.user)
            || !source_state.replication_grants.contains(&source.user)
        {
            return Some(Stream::Failing(format!(
                "error connecting to source '{}@{}:{}' - retry-time: 60 retries: 1 message: \
                 Access denied for user '{}'@'%' (using password: YES)",
                source.user, source.host, source.port, source.user
            )));
        }
        Some(Stream::Streaming)
    }

    /// Applies the source's state to every streaming replica.
    fn replicate(&mut self) {
        let streaming: Vec<(String, String)> = self
            .nodes
            .iter()
            .filter(|(name, _)| matches!(self.stream(name), Some(Stream::Streaming)))
            .filter_map(|(name, state)| {
                let source = state.source.as_ref()?;
                Some((name.clone(), self.resolve_source(source)?.to_string()))
            })
            .collect();

        for (replica, source) in streaming {
            let Some(source_state) = self.nodes.get(&source).cloned() else {
                continue;
            };
            let purged = source_state.gtid_executed();
            if let Some(state) = self.nodes.get_mut(&replica) {
                state.databases = source_state.databases;
                state.users = source_state.users;
                state.replication_grants = source_state.replication_grants;
                state.purged = Some(purged);
            }
        }
    }

    fn status_output(&mut self, name: &str) -> String {
        if self.garbled_status.contains(name) {
            return "Replication_Channel_State: ON\nChannel: default\n".to_string();
        }
        let Some(stream) = self.stream(name) else {
            return String::new();
        };
        let Some(state) = self.nodes.get_mut(name) else {
            return String::new();
        };
        let Some(source) = state.source.clone() else {
            return String::new();
        };

        let (io, sql, io_error, behind) = match stream {
            Stream::Streaming => ("Yes", "Yes", String::new(), "0"),
            Stream::Connecting => ("Connecting", "Yes", String::new(), "NULL"),
            Stream::Failing(error) => ("Connecting", "Yes", error, "NULL"),
            Stream::Stopped => ("No", "No", String::new(), "NULL"),
        };
        if state.reconnect_polls > 0 {
            state.reconnect_polls -= 1;
        }

        format!(
            "*************************** 1. row ***************************\n\
             \x20            Replica_IO_State: {}\n\
             \x20                 Source_Host: {}\n\
             \x20                 Source_User: {}\n\
             \x20                 Source_Port: {}\n\
             \x20          Replica_IO_Running: {}\n\
             \x20         Replica_SQL_Running: {}\n\
             \x20              Last_IO_Errno: {}\n\
             \x20              Last_IO_Error: {}\n\
             \x20             Last_SQL_Errno: 0\n\
             \x20             Last_SQL_Error: \n\
             \x20       Seconds_Behind_Source: {}\n\
             \x20          Executed_Gtid_Set: {}\n\
             \x20               Auto_Position: 1\n",
            if io == "Yes" {
                "Waiting for source to send event"
            } else {
                ""
            },
            source.host,
            source.user,
            source.port,
            io,
            sql,
            if io_error.is_empty() { 0 } else { 2061 },
            io_error,
            behind,
            state.gtid_executed(),
        )
    }

    fn apply(&mut self, node: &Node, command: &AdminCommand) -> ExecOutput {
        let name = node.name.as_str();
        let Some(state) = self.nodes.get_mut(name) else {
            return cant_connect(node);
        };

        match command {
            AdminCommand::Ping => ok("1\n"),
            AdminCommand::CreateUser { user, .. } => {
                if state.users.insert(user.clone()) {
                    state.transactions += 1;
                }
                ok("")
            }
            AdminCommand::DropUser { user } => {
                let existed = state.users.remove(user);
                state.replication_grants.remove(user);
                if existed {
                    state.transactions += 1;
                }
                ok("")
            }
            AdminCommand::UserExists { user } => {
                ok(if state.users.contains(user) { "1\n" } else { "0\n" })
            }
            AdminCommand::GrantReplication { user } => {
                if !state.users.contains(user) {
                    return fail(
                        1,
                        "ERROR 1410 (42000) at line 1: You are not allowed to create a user with GRANT",
                    );
                }
                state.replication_grants.insert(user.clone());
                state.transactions += 1;
                ok("")
            }
            AdminCommand::ShowDatabases => {
                let mut names: Vec<&str> = SYSTEM_DATABASES.to_vec();
                names.extend(state.databases.iter().map(String::as_str));
                names.sort_unstable();
                ok(&format!("{}\n", names.join("\n")))
            }
            AdminCommand::CreateDatabase { name } => {
                if state.databases.insert(name.clone()) {
                    state.transactions += 1;
                }
                ok("")
            }
            AdminCommand::DropDatabase { name } => {
                if state.databases.remove(name) {
                    state.transactions += 1;
                }
                ok("")
            }
            AdminCommand::Dump { databases } => {
                if let Some(missing) = databases.iter().find(|d| !state.databases.contains(*d)) {
                    return fail(
                        2,
                        &format!(
                            "mysqldump: Got error: 1049: Unknown database '{}' when selecting the database",
                            missing
                        ),
                    );
                }
                let mut dump = format!(
                    "-- pairctl simulated dump\n\
                     SET @@SESSION.SQL_LOG_BIN= 0;\n\
                     SET @@GLOBAL.GTID_PURGED=/*!80000 '+'*/ '{}';\n",
                    state.gtid_executed()
                );
                for db in databases {
                    dump.push_str(&format!(
                        "CREATE DATABASE /*!32312 IF NOT EXISTS*/ {};\nUSE {};\n",
                        quote_ident(db),
                        quote_ident(db)
                    ));
                }
                ok(&dump)
            }
            AdminCommand::Restore { payload } => {
                for db in dump_databases(payload) {
                    state.databases.insert(db);
                }
                if let Some(position) = dump_position(payload) {
                    state.purged = Some(position.as_str().to_string());
                }
                ok("")
            }
            AdminCommand::Import { database, .. } => {
                if !state.databases.contains(database) {
                    return fail(1, &format!("ERROR 1049 (42000): Unknown database '{}'", database));
                }
                state.transactions += 1;
                ok("")
            }
            AdminCommand::ResetBinaryLogs => {
                state.transactions = 0;
                state.purged = None;
                ok("")
            }
            AdminCommand::SetPurgedPosition { position } => {
                if !state.gtid_executed().is_empty() {
                    return fail(
                        1,
                        "ERROR 1840 (HY000) at line 1: @@GLOBAL.GTID_PURGED can only be set when \
                         @@GLOBAL.GTID_EXECUTED is empty.",
                    );
                }
                state.purged = (!position.is_empty()).then(|| position.clone());
                ok("")
            }
            AdminCommand::ChangeSource {
                host, port, user, ..
            } => {
                if state.replica_running {
                    return fail(
                        1,
                        "ERROR 3021 (HY000) at line 1: This operation cannot be performed with a \
                         running replica io thread; run STOP REPLICA IO_THREAD FOR CHANNEL '' first.",
                    );
                }
                state.source = Some(SimulatedSource {
                    host: host.clone(),
                    port: *port,
                    user: user.clone(),
                });
                ok("")
            }
            AdminCommand::StartReplica => {
                if state.source.is_none() {
                    return fail(
                        1,
                        "ERROR 1200 (HY000) at line 1: The server is not configured as replica; \
                         fix in config file or with CHANGE REPLICATION SOURCE TO",
                    );
                }
                state.replica_running = true;
                ok("")
            }
            AdminCommand::StopReplica => {
                state.replica_running = false;
                ok("")
            }
            AdminCommand::ResetReplicaAll => {
                if state.replica_running {
                    return fail(
                        1,
                        "ERROR 3081 (HY000) at line 1: This operation cannot be performed with \
                         running replication threads; run STOP REPLICA FOR CHANNEL '' first",
                    );
                }
                state.source = None;
                ok("")
            }
            AdminCommand::ShowReplicaStatus => {
                let output = self.status_output(name);
                ok(&output)
            }
            AdminCommand::ExecutedPosition => ok(&format!("{}\n", state.gtid_executed())),
            AdminCommand::Sql(_) => ok(""),
        }
    }
}

fn ok(stdout: &str) -> ExecOutput {
    ExecOutput::new(stdout, "", 0)
}

fn fail(exit_code: i32, stderr: &str) -> ExecOutput {
    ExecOutput::new("", stderr, exit_code)
}

fn cant_connect(node: &Node) -> ExecOutput {
    fail(
        1,
        &format!(
            "ERROR 2003 (HY000): Can't connect to MySQL server on '{}' (111)",
            node.address
        ),
    )
}

/// Executor backed by an in-memory model of the pair.
#[derive(Debug, Default)]
pub struct SimulatedExecutor {
    inner: Mutex<Inner>,
}

impl SimulatedExecutor {
    /// Creates a simulation with one empty server per topology node.
    pub fn new(topology: &TopologyState) -> Self {
        let mut inner = Inner {
            reconnect_polls_after_restart: 2,
            ..Default::default()
        };
        for node in topology.nodes() {
            inner.nodes.insert(
                node.name.clone(),
                SimulatedState {
                    server_uuid: format!("{:08x}-0000-4000-8000-00000000{:04x}", node.id.inner(), node.id.inner()),
                    ..Default::default()
                },
            );
            inner
                .addresses
                .insert((node.address.host.clone(), node.address.port), node.name.clone());
            inner
                .addresses
                .insert((node.name.clone(), 3306), node.name.clone());
        }
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Creates a simulation where the primary already has `databases` and
    /// every replica is streaming from it, as after a completed provision.
    pub async fn provisioned(topology: &TopologyState, user: &str, databases: &[&str]) -> Self {
        let sim = Self::new(topology);
        {
            let mut inner = sim.inner.lock().await;
            let primary = topology.nodes().find(|n| n.role == NodeRole::Primary).cloned();
            if let Some(primary) = primary {
                if let Some(state) = inner.nodes.get_mut(&primary.name) {
                    state.users.insert(user.to_string());
                    state.replication_grants.insert(user.to_string());
                    state.databases.extend(databases.iter().map(|d| d.to_string()));
                    state.transactions = 1 + databases.len() as u64;
                }
                for replica in topology.replicas() {
                    if let Some(state) = inner.nodes.get_mut(&replica.name) {
                        state.source = Some(SimulatedSource {
                            host: primary.address.host.clone(),
                            port: primary.address.port,
                            user: user.to_string(),
                        });
                        state.replica_running = true;
                    }
                }
            }
            inner.replicate();
        }
        sim
    }

    /// Adds a database to a node.
    pub async fn seed_database(&self, node: &str, database: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.nodes.get_mut(node) {
            state.databases.insert(database.to_string());
            state.transactions += 1;
        }
    }

    /// Makes a node refuse connections, or accept them again.
    pub async fn set_reachable(&self, node: &str, reachable: bool) {
        let mut inner = self.inner.lock().await;
        if reachable {
            inner.unreachable.remove(node);
        } else {
            inner.unreachable.insert(node.to_string());
        }
    }

    /// Makes a node reject the administrative credentials.
    pub async fn reject_auth(&self, node: &str, reject: bool) {
        let mut inner = self.inner.lock().await;
        if reject {
            inner.auth_rejected.insert(node.to_string());
        } else {
            inner.auth_rejected.remove(node);
        }
    }

    /// Makes a node report replica status in an unrecognized format.
    pub async fn garble_status(&self, node: &str, garble: bool) {
        let mut inner = self.inner.lock().await;
        if garble {
            inner.garbled_status.insert(node.to_string());
        } else {
            inner.garbled_status.remove(node);
        }
    }

    /// Keeps a replica's IO thread connecting forever.
    pub async fn stall_replication(&self, node: &str, stall: bool) {
        let mut inner = self.inner.lock().await;
        if stall {
            inner.stalled.insert(node.to_string());
        } else {
            inner.stalled.remove(node);
        }
    }

    /// Fails the next `times` commands of `kind` with a server error.
    pub async fn fail_next(&self, kind: &str, times: u32) {
        let mut inner = self.inner.lock().await;
        *inner.failures.entry(kind.to_string()).or_default() += times;
    }

    /// Lets the next `times` commands of `kind` take effect, then reports
    /// them as failed, like a client that dies partway through a load.
    pub async fn fail_next_after_apply(&self, kind: &str, times: u32) {
        let mut inner = self.inner.lock().await;
        *inner.late_failures.entry(kind.to_string()).or_default() += times;
    }

    /// Sets how many status reads a restarted replica reports
    /// `Connecting` before it streams again.
    pub async fn set_reconnect_polls(&self, polls: u32) {
        self.inner.lock().await.reconnect_polls_after_restart = polls;
    }

    /// Returns a copy of a node's state.
    pub async fn state(&self, node: &str) -> Option<SimulatedState> {
        self.inner.lock().await.nodes.get(node).cloned()
    }

    /// Returns how many commands of `kind` succeeded on `node`.
    pub async fn count(&self, node: &str, kind: &str) -> usize {
        self.inner
            .lock()
            .await
            .log
            .iter()
            .filter(|(n, k)| n == node && *k == kind)
            .count()
    }

    /// Returns every successful command as `(node, kind)`, in order.
    pub async fn history(&self) -> Vec<(String, &'static str)> {
        self.inner.lock().await.log.clone()
    }
}

#[async_trait]
impl CommandExecutor for SimulatedExecutor {
    async fn execute(&self, node: &Node, command: &AdminCommand) -> Result<ExecOutput> {
        let mut inner = self.inner.lock().await;
        debug!(node = %node.name, command = %command, "Simulating command");

        let output = if inner.unreachable.contains(&node.name) {
            cant_connect(node)
        } else if inner.auth_rejected.contains(&node.name) {
            fail(
                1,
                &format!(
                    "ERROR 1045 (28000): Access denied for user '{}'@'%' (using password: YES)",
                    node.credentials.user
                ),
            )
        } else if let Some(remaining) = inner
            .failures
            .get_mut(command.kind())
            .filter(|remaining| **remaining > 0)
        {
            *remaining -= 1;
            fail(1, "ERROR 1105 (HY000): injected failure")
        } else {
            inner.replicate();
            let mut output = inner.apply(node, command);
            inner.replicate();
            if let Some(remaining) = inner
                .late_failures
                .get_mut(command.kind())
                .filter(|remaining| **remaining > 0)
            {
                *remaining -= 1;
                output = fail(1, "ERROR 2013 (HY000) at line 412: Lost connection to MySQL server during query");
            }
            output
        };

        if output.success() {
            inner.log.push((node.name.clone(), command.kind()));
        }
        classify_output(node, command, output)
    }

    fn name(&self) -> &str {
        "simulated"
    }

    async fn restart(&self, node: &Node) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.unreachable.contains(&node.name) {
            return classify_output(node, &AdminCommand::Ping, cant_connect(node)).map(|_| ());
        }

        let polls = inner.reconnect_polls_after_restart;
        if let Some(state) = inner.nodes.get_mut(&node.name) {
            if state.source.is_some() && state.replica_running {
                state.reconnect_polls = polls;
            }
        }
        info!(node = %node.name, "Simulated restart");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestratorError;
    use pairctl_core::{Credentials, NodeAddress, NodeId};

    fn topology() -> TopologyState {
        let mut t = TopologyState::new("sim");
        t.add_node(Node::new(
            NodeId(1),
            "mysql-1",
            NodeRole::Primary,
            NodeAddress::new("127.0.0.1", 3306),
            Credentials::new("root", "pw"),
        ))
        .unwrap();
        t.add_node(Node::new(
            NodeId(2),
            "mysql-2",
            NodeRole::Replica,
            NodeAddress::new("127.0.0.1", 3307),
            Credentials::new("root", "pw"),
        ))
        .unwrap();
        t
    }

    #[tokio::test]
    async fn test_replication_mirrors_primary() {
        let t = topology();
        let sim = SimulatedExecutor::provisioned(&t, "repl", &["shop"]).await;
        let primary = t.node(NodeId(1)).unwrap();
        let replica = t.node(NodeId(2)).unwrap();

        sim.execute(primary, &AdminCommand::CreateDatabase { name: "billing".into() })
            .await
            .unwrap();
        let out = sim.execute(replica, &AdminCommand::ShowDatabases).await.unwrap();
        assert!(out.stdout_lines().contains(&"billing"));
        assert!(out.stdout_lines().contains(&"shop"));

        let status = sim.execute(replica, &AdminCommand::ShowReplicaStatus).await.unwrap();
        assert!(status.stdout.contains("Replica_IO_Running: Yes"));
    }

    #[tokio::test]
    async fn test_missing_replication_user_is_an_io_error() {
        let t = topology();
        let sim = SimulatedExecutor::new(&t);
        let replica = t.node(NodeId(2)).unwrap();

        sim.execute(
            replica,
            &AdminCommand::ChangeSource {
                host: "127.0.0.1".into(),
                port: 3306,
                user: "repl".into(),
                password: "x".into(),
            },
        )
        .await
        .unwrap();
        sim.execute(replica, &AdminCommand::StartReplica).await.unwrap();

        let status = sim.execute(replica, &AdminCommand::ShowReplicaStatus).await.unwrap();
        assert!(status.stdout.contains("Access denied for user 'repl'"));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let t = topology();
        let sim = SimulatedExecutor::new(&t);
        let primary = t.node(NodeId(1)).unwrap();

        sim.fail_next("create-database", 1).await;
        let err = sim
            .execute(primary, &AdminCommand::CreateDatabase { name: "x".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Command { .. }));
        sim.execute(primary, &AdminCommand::CreateDatabase { name: "x".into() })
            .await
            .unwrap();
        assert_eq!(sim.count("mysql-1", "create-database").await, 1);

        sim.set_reachable("mysql-1", false).await;
        assert!(matches!(
            sim.execute(primary, &AdminCommand::Ping).await,
            Err(OrchestratorError::Connection { .. })
        ));

        sim.set_reachable("mysql-1", true).await;
        sim.reject_auth("mysql-1", true).await;
        assert!(matches!(
            sim.execute(primary, &AdminCommand::Ping).await,
            Err(OrchestratorError::Auth { .. })
        ));
    }

    #[tokio::test]
    async fn test_dump_and_restore() {
        let t = topology();
        let sim = SimulatedExecutor::new(&t);
        sim.seed_database("mysql-1", "shop").await;
        let primary = t.node(NodeId(1)).unwrap();
        let replica = t.node(NodeId(2)).unwrap();

        let dump = sim
            .execute(primary, &AdminCommand::Dump { databases: vec!["shop".into()] })
            .await
            .unwrap();
        assert!(dump_position(dump.stdout.as_bytes()).is_some());

        sim.execute(
            replica,
            &AdminCommand::Restore {
                payload: dump.stdout.into_bytes(),
            },
        )
        .await
        .unwrap();
        let state = sim.state("mysql-2").await.unwrap();
        assert!(state.databases.contains("shop"));
        assert!(state.purged.is_some());
    }

    #[tokio::test]
    async fn test_replica_follows_source() {
        let t = topology();
        let sim = SimulatedExecutor::provisioned(&t, "repl", &["shop"]).await;
        let primary_gtid = sim.state("mysql-1").await.unwrap().gtid_executed();

        let replica = sim.state("mysql-2").await.unwrap();
        assert!(replica.databases.contains("shop"));
        assert!(replica.replication_grants.contains("repl"));
        assert_eq!(replica.purged.as_deref(), Some(primary_gtid.as_str()));
    }

    #[tokio::test]
    async fn test_late_failure_applies_the_command() {
        let t = topology();
        let sim = SimulatedExecutor::new(&t);
        let primary = t.node(NodeId(1)).unwrap();

        sim.fail_next_after_apply("create-database", 1).await;
        let err = sim
            .execute(primary, &AdminCommand::CreateDatabase { name: "shop".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Connection { .. }));
        assert!(sim.state("mysql-1").await.unwrap().databases.contains("shop"));
        assert_eq!(sim.count("mysql-1", "create-database").await, 0);
    }

    #[tokio::test]
    async fn test_purged_position_needs_empty_history() {
        let t = topology();
        let sim = SimulatedExecutor::new(&t);
        let replica = t.node(NodeId(2)).unwrap();
        let set = AdminCommand::SetPurgedPosition {
            position: "00000001-0000-4000-8000-000000000001:1-3".into(),
        };

        sim.execute(replica, &set).await.unwrap();
        assert!(sim.execute(replica, &set).await.is_err());

        sim.execute(replica, &AdminCommand::ResetBinaryLogs).await.unwrap();
        sim.execute(replica, &set).await.unwrap();
        assert_eq!(
            sim.state("mysql-2").await.unwrap().gtid_executed(),
            "00000001-0000-4000-8000-000000000001:1-3"
        );
    }
}
