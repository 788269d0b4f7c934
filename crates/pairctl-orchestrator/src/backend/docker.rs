//! Docker exec backend.
//!
//! Runs the database clients inside each node's container through the
//! Docker API (via bollard), connecting over the container's local socket.
//! Also restarts containers for the lifecycle controller.

use async_trait::async_trait;
use bollard::container::{InspectContainerOptions, LogOutput, RestartContainerOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;
use pairctl_core::Node;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::backend::r#trait::{classify_output, CommandExecutor, ExecOutput};
use crate::command::AdminCommand;
use crate::error::{OrchestratorError, Result};

/// Configuration for the Docker backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerExecutorConfig {
    /// Docker API endpoint. Local defaults (socket or `DOCKER_HOST`) when unset.
    pub endpoint: Option<String>,

    /// Seconds the daemon waits for a graceful stop on restart.
    pub restart_grace_secs: i64,
}

impl Default for DockerExecutorConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            restart_grace_secs: 10,
        }
    }
}

/// Executor that runs clients inside node containers.
pub struct DockerExecutor {
    docker: Docker,
    config: DockerExecutorConfig,
}

impl DockerExecutor {
    /// Connects to the Docker daemon.
    pub fn new(config: DockerExecutorConfig) -> Result<Self> {
        let docker = match &config.endpoint {
            Some(endpoint) if endpoint.starts_with("http") || endpoint.starts_with("tcp") => {
                Docker::connect_with_http(endpoint, 120, bollard::API_DEFAULT_VERSION)?
            }
            Some(endpoint) => {
                Docker::connect_with_socket(endpoint, 120, bollard::API_DEFAULT_VERSION)?
            }
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self { docker, config })
    }

    /// Checks that the node's container exists and is running.
    async fn ensure_running(&self, node: &Node) -> Result<()> {
        let container = node.container_name();
        let inspect = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| runtime_error(node, e))?;

        let running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);
        if !running {
            return Err(OrchestratorError::connection(
                &node.name,
                format!("container {} is not running", container),
            ));
        }
        Ok(())
    }
}

/// Container runtime failures count as the node being unreachable.
fn runtime_error(node: &Node, err: bollard::errors::Error) -> OrchestratorError {
    OrchestratorError::connection(&node.name, format!("container {}: {}", node.container_name(), err))
}

#[async_trait]
impl CommandExecutor for DockerExecutor {
    async fn execute(&self, node: &Node, command: &AdminCommand) -> Result<ExecOutput> {
        self.ensure_running(node).await?;

        let mut cmd = vec![command.client().program().to_string()];
        cmd.extend(command.args(node, false));

        debug!(
            node = %node.name,
            container = %node.container_name(),
            command = %command,
            "Executing command"
        );

        let exec_options = CreateExecOptions {
            cmd: Some(cmd),
            env: Some(vec![format!("MYSQL_PWD={}", node.credentials.password)]),
            attach_stdin: Some(command.stdin().is_some()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(node.container_name(), exec_options)
            .await
            .map_err(|e| runtime_error(node, e))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| runtime_error(node, e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, mut input } = start_result {
            if let Some(payload) = command.stdin() {
                input.write_all(payload).await?;
                input.shutdown().await?;
            }

            while let Some(result) = output.next().await {
                match result {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => return Err(runtime_error(node, e)),
                }
            }
        }

        let exec_inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| runtime_error(node, e))?;
        let exit_code = exec_inspect.exit_code.unwrap_or(-1) as i32;

        classify_output(
            node,
            command,
            ExecOutput {
                stdout,
                stderr,
                exit_code,
            },
        )
    }

    fn name(&self) -> &str {
        "docker"
    }

    async fn is_ready(&self) -> bool {
        self.docker.ping().await.is_ok()
    }

    async fn restart(&self, node: &Node) -> Result<()> {
        self.docker
            .restart_container(
                node.container_name(),
                Some(RestartContainerOptions {
                    t: self.config.restart_grace_secs as isize,
                }),
            )
            .await
            .map_err(|e| runtime_error(node, e))?;

        info!(node = %node.name, container = %node.container_name(), "Restarted container");
        Ok(())
    }
}
