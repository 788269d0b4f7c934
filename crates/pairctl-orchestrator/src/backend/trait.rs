//! Command executor trait definition.

use std::sync::Arc;

use async_trait::async_trait;
use pairctl_core::Node;
use serde::{Deserialize, Serialize};

use crate::command::AdminCommand;
use crate::error::{OrchestratorError, Result};

/// Runs administrative commands against database nodes.
///
/// # Contract
///
/// `execute` returns the client output only when the command exited with
/// code 0. Otherwise it fails with:
///
/// - [`OrchestratorError::Connection`] if the node is unreachable,
/// - [`OrchestratorError::Auth`] if the node rejected the credentials,
/// - [`OrchestratorError::Command`] for any other non-zero exit.
///
/// Implementations never retry; retry policy belongs to the caller. A call
/// has no side effects beyond the command it runs.
///
/// # Example
///
/// ```ignore
/// use pairctl_orchestrator::backend::{CommandExecutor, ProcessExecutor};
/// use pairctl_orchestrator::command::AdminCommand;
///
/// async fn databases(node: &Node) -> Result<Vec<String>> {
///     let executor = ProcessExecutor::default();
///     let output = executor.execute(node, &AdminCommand::ShowDatabases).await?;
///     Ok(output.stdout_lines().into_iter().map(String::from).collect())
/// }
/// ```
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs one command on one node.
    async fn execute(&self, node: &Node, command: &AdminCommand) -> Result<ExecOutput>;

    /// Returns the name of this backend.
    fn name(&self) -> &str;

    /// Checks if the backend itself is usable (daemon reachable, client
    /// installed).
    async fn is_ready(&self) -> bool {
        true
    }

    /// Restarts the server process of a node.
    ///
    /// Default implementation returns an error if not supported.
    async fn restart(&self, node: &Node) -> Result<()> {
        let _ = node;
        Err(OrchestratorError::capability_not_supported("restart"))
    }
}

/// An executor shared between the reader, orchestrator and controller.
pub type SharedExecutor = Arc<dyn CommandExecutor>;

/// Output from running a client command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,

    /// Standard error from the command.
    pub stderr: String,

    /// Exit code of the command.
    pub exit_code: i32,
}

impl ExecOutput {
    /// Creates a new exec output.
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns non-empty stdout lines, trimmed.
    pub fn stdout_lines(&self) -> Vec<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect()
    }
}

/// Client error codes that mean the server was never reached.
const CONNECTION_ERRORS: &[&str] = &["ERROR 2002", "ERROR 2003", "ERROR 2005", "ERROR 2013"];

/// Maps raw client output to the executor contract.
///
/// Exit code 0 passes through. Otherwise the client's stderr decides
/// between `Auth`, `Connection` and `Command`.
pub fn classify_output(node: &Node, command: &AdminCommand, output: ExecOutput) -> Result<ExecOutput> {
    if output.success() {
        return Ok(output);
    }

    let stderr = output.stderr.trim();
    if stderr.contains("ERROR 1045") || stderr.contains("Access denied") {
        return Err(OrchestratorError::auth(&node.name, stderr));
    }
    if CONNECTION_ERRORS.iter().any(|code| stderr.contains(code))
        || stderr.contains("Can't connect")
        || stderr.contains("Lost connection")
    {
        return Err(OrchestratorError::connection(&node.name, stderr));
    }

    Err(OrchestratorError::command(
        &node.name,
        command.kind(),
        output.exit_code,
        stderr,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairctl_core::{Credentials, NodeAddress, NodeId, NodeRole};

    fn node() -> Node {
        Node::new(
            NodeId(2),
            "mysql-2",
            NodeRole::Replica,
            NodeAddress::new("localhost", 3307),
            Credentials::new("root", "pw"),
        )
    }

    #[test]
    fn test_exec_output() {
        let output = ExecOutput::new("shop\n\n  billing \n", "", 0);
        assert!(output.success());
        assert_eq!(output.stdout_lines(), vec!["shop", "billing"]);
    }

    #[test]
    fn test_classification() {
        let cmd = AdminCommand::Ping;

        let ok = classify_output(&node(), &cmd, ExecOutput::new("1", "", 0)).unwrap();
        assert_eq!(ok.stdout, "1");

        let auth = ExecOutput::new(
            "",
            "ERROR 1045 (28000): Access denied for user 'root'@'172.18.0.1' (using password: YES)",
            1,
        );
        assert!(matches!(
            classify_output(&node(), &cmd, auth),
            Err(OrchestratorError::Auth { .. })
        ));

        let refused = ExecOutput::new(
            "",
            "ERROR 2003 (HY000): Can't connect to MySQL server on 'localhost:3307' (111)",
            1,
        );
        assert!(matches!(
            classify_output(&node(), &cmd, refused),
            Err(OrchestratorError::Connection { .. })
        ));

        let other = ExecOutput::new("", "ERROR 1007 (HY000): database exists", 1);
        match classify_output(&node(), &cmd, other) {
            Err(OrchestratorError::Command {
                command, exit_code, ..
            }) => {
                assert_eq!(command, "ping");
                assert_eq!(exit_code, 1);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
