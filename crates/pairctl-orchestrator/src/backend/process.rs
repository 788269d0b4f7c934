//! Local client process backend.
//!
//! Runs the `mysql` and `mysqldump` binaries installed on the operator's
//! machine against each node's network address.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use pairctl_core::Node;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::backend::r#trait::{classify_output, CommandExecutor, ExecOutput};
use crate::command::{AdminCommand, Client};
use crate::error::{OrchestratorError, Result};

/// Configuration for the process backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessExecutorConfig {
    /// Path or name of the `mysql` client.
    pub mysql_path: PathBuf,

    /// Path or name of the `mysqldump` client.
    pub mysqldump_path: PathBuf,

    /// Client connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Upper bound on one command, including dumps and restores.
    pub command_timeout_secs: u64,
}

impl Default for ProcessExecutorConfig {
    fn default() -> Self {
        Self {
            mysql_path: PathBuf::from("mysql"),
            mysqldump_path: PathBuf::from("mysqldump"),
            connect_timeout_secs: 5,
            command_timeout_secs: 3600,
        }
    }
}

/// Executor that spawns local client processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    config: ProcessExecutorConfig,
}

impl ProcessExecutor {
    /// Creates a process executor.
    pub fn new(config: ProcessExecutorConfig) -> Self {
        Self { config }
    }

    fn program(&self, client: Client) -> &PathBuf {
        match client {
            Client::Mysql => &self.config.mysql_path,
            Client::Mysqldump => &self.config.mysqldump_path,
        }
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, node: &Node, command: &AdminCommand) -> Result<ExecOutput> {
        let program = self.program(command.client());
        let mut args = command.args(node, true);
        if command.client() == Client::Mysql {
            args.insert(0, format!("--connect-timeout={}", self.config.connect_timeout_secs));
        }

        debug!(node = %node.name, command = %command, program = %program.display(), "Executing command");

        let mut child = Command::new(program)
            .args(&args)
            .env("MYSQL_PWD", &node.credentials.password)
            .stdin(if command.stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OrchestratorError::configuration(format!(
                    "cannot run {}: {}",
                    program.display(),
                    e
                ))
            })?;

        let writer = match (command.stdin(), child.stdin.take()) {
            (Some(payload), Some(mut stdin)) => {
                let payload = payload.to_vec();
                Some(tokio::spawn(async move {
                    stdin.write_all(&payload).await?;
                    stdin.shutdown().await
                }))
            }
            _ => None,
        };

        let limit = Duration::from_secs(self.config.command_timeout_secs);
        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| {
                OrchestratorError::connection(
                    &node.name,
                    format!("{} did not finish within {}s", command, limit.as_secs()),
                )
            })??;

        if let Some(writer) = writer {
            // A client that exits early closes stdin; its stderr explains why.
            if let Ok(Err(e)) = writer.await {
                debug!(node = %node.name, error = %e, "Client closed stdin early");
            }
        }

        let output = ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        };
        classify_output(node, command, output)
    }

    fn name(&self) -> &str {
        "process"
    }

    async fn is_ready(&self) -> bool {
        Command::new(&self.config.mysql_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }
}
