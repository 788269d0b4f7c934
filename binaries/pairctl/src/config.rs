//! CLI configuration.
//!
//! Loaded from a TOML file, merged with command-line flags and validated
//! before anything touches the pair. Every section has defaults, so a file
//! only needs the values that differ.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use pairctl_core::{Credentials, Node, NodeAddress, NodeId, NodeRole, TopologyState};
use pairctl_orchestrator::backend::{DockerExecutorConfig, ProcessExecutorConfig};
use pairctl_orchestrator::compose::ComposeSettings;
use pairctl_orchestrator::{BackoffPolicy, OrchestratorSettings, ReplicationSettings};
use serde::{Deserialize, Serialize};

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairctlConfig {
    /// Nodes of the pair.
    pub topology: TopologyConfig,

    /// Journal, snapshot and lock storage.
    pub state: StateConfig,

    /// Replication account.
    pub replication: ReplicationConfig,

    /// Verification polling.
    pub verification: VerificationConfig,

    /// Restart recovery polling.
    pub recovery: RecoveryConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Command executor backend.
    pub backend: BackendConfig,

    /// Container manifest and admin UI.
    pub admin_ui: ComposeSettings,
}

/// Topology definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Name shown in status output.
    pub name: String,

    /// One primary and at least one replica.
    pub nodes: Vec<NodeConfig>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            name: "pairctl".to_string(),
            nodes: vec![
                NodeConfig::new(1, "mysql-primary", NodeRole::Primary, 3306),
                NodeConfig::new(2, "mysql-replica", NodeRole::Replica, 3307),
            ],
        }
    }
}

/// One database node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique numeric id; also the server id in the compose manifest.
    pub id: u32,

    /// Unique node name.
    pub name: String,

    /// Primary or replica.
    pub role: NodeRole,

    /// Host the administrative client connects to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Client port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Administrative user.
    #[serde(default = "default_admin_user")]
    pub user: String,

    /// Administrative password. Prefer `password_env`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Environment variable holding the administrative password.
    #[serde(default)]
    pub password_env: Option<String>,

    /// Container name when it differs from the node name.
    #[serde(default)]
    pub container: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_admin_user() -> String {
    "root".to_string()
}

impl NodeConfig {
    fn new(id: u32, name: &str, role: NodeRole, port: u16) -> Self {
        Self {
            id,
            name: name.to_string(),
            role,
            host: default_host(),
            port,
            user: default_admin_user(),
            password: String::new(),
            password_env: Some("MYSQL_ROOT_PASSWORD".to_string()),
            container: None,
        }
    }

    fn to_node(&self, require_secrets: bool) -> anyhow::Result<Node> {
        let password = resolve_secret(
            &format!("password of node {}", self.name),
            &self.password,
            self.password_env.as_deref(),
            require_secrets,
        )?;
        let mut node = Node::new(
            NodeId::new(self.id),
            self.name.clone(),
            self.role,
            NodeAddress::new(self.host.clone(), self.port),
            Credentials::new(self.user.clone(), password),
        );
        if let Some(container) = &self.container {
            node = node.with_container(container.clone());
        }
        Ok(node)
    }
}

/// State directory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Root of the journal, snapshot catalog and lock files.
    pub dir: PathBuf,

    /// Sync the journal to disk after every append.
    pub sync_on_write: bool,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".pairctl"),
            sync_on_write: true,
        }
    }
}

/// Replication account configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Replication user created on the primary.
    pub user: String,

    /// Replication password. Prefer `password_env`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Environment variable holding the replication password.
    pub password_env: Option<String>,

    /// Source host as the replica reaches it.
    pub source_host: Option<String>,

    /// Source port as the replica reaches it.
    pub source_port: Option<u16>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            user: "repl".to_string(),
            password: String::new(),
            password_env: Some("PAIRCTL_REPL_PASSWORD".to_string()),
            source_host: None,
            source_port: None,
        }
    }
}

/// Verification polling configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    /// Interval between status reads in milliseconds.
    pub interval_ms: u64,

    /// Time allowed for a replica to reach the expected state, in seconds.
    pub timeout_secs: u64,

    /// Undo completed steps when a provisioning step fails.
    pub rollback_on_failure: bool,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            timeout_secs: 60,
            rollback_on_failure: true,
        }
    }
}

impl VerificationConfig {
    /// Returns the verification polling policy.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::fixed(
            Duration::from_millis(self.interval_ms),
            Duration::from_secs(self.timeout_secs),
        )
    }
}

/// Restart recovery configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// First backoff delay in milliseconds.
    pub initial_delay_ms: u64,

    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,

    /// Status reads before giving up.
    pub max_attempts: u32,

    /// Overall deadline in seconds.
    pub timeout_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 10_000,
            max_attempts: 30,
            timeout_secs: 300,
        }
    }
}

impl RecoveryConfig {
    /// Returns the recovery backoff policy.
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::exponential(
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
        .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: String,

    /// Log format (pretty, json, compact).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Executor backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local `mysql`/`mysqldump` processes.
    #[default]
    Process,
    /// Clients run inside the node containers.
    Docker,
    /// In-memory pair, for dry runs.
    Simulated,
}

/// Backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Which backend runs commands.
    pub kind: BackendKind,

    /// Process backend settings.
    pub process: ProcessExecutorConfig,

    /// Docker backend settings.
    pub docker: DockerExecutorConfig,
}

impl PairctlConfig {
    /// Loads configuration from a file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merges CLI arguments into the configuration.
    pub fn merge_cli_args(&mut self, args: &super::CliArgs) {
        if let Some(ref level) = args.log_level {
            self.logging.level = level.clone();
        }

        if let Some(backend) = args.backend {
            self.backend.kind = backend;
        }

        if let Some(ref dir) = args.state_dir {
            self.state.dir = dir.clone();
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        for node in &self.topology.nodes {
            if node.port == 0 {
                anyhow::bail!("Node {} has no port", node.name);
            }
        }
        let topology = self.topology()?;
        if topology.replicas().next().is_none() {
            anyhow::bail!("Topology has no replica");
        }

        if self.replication.user.trim().is_empty() {
            anyhow::bail!("Replication user must not be empty");
        }
        self.replication_password()?;

        if self.verification.interval_ms == 0 {
            anyhow::bail!("Verification interval must be positive");
        }
        if self.verification.timeout_secs * 1000 < self.verification.interval_ms {
            anyhow::bail!(
                "Verification timeout ({}s) is shorter than its interval ({}ms)",
                self.verification.timeout_secs,
                self.verification.interval_ms
            );
        }
        if self.recovery.max_attempts == 0 {
            anyhow::bail!("Recovery needs at least one attempt");
        }
        if self.recovery.initial_delay_ms > self.recovery.max_delay_ms {
            anyhow::bail!("Recovery initial delay exceeds its maximum delay");
        }

        Ok(())
    }

    /// Builds the topology with credentials resolved.
    pub fn topology(&self) -> anyhow::Result<TopologyState> {
        let mut topology = TopologyState::new(self.topology.name.clone());
        for node in &self.topology.nodes {
            topology.add_node(node.to_node(self.requires_secrets())?)?;
        }
        topology.primary()?;
        Ok(topology)
    }

    /// Returns the orchestrator settings for `topology`.
    ///
    /// The Docker backend points replicas at the primary's container name on
    /// the default port unless a source address is configured.
    pub fn orchestrator_settings(&self, topology: &TopologyState) -> anyhow::Result<OrchestratorSettings> {
        let mut source_host = self.replication.source_host.clone();
        let mut source_port = self.replication.source_port;
        if self.backend.kind == BackendKind::Docker && source_host.is_none() {
            source_host = Some(topology.primary()?.container_name().to_string());
            source_port = source_port.or(Some(3306));
        }

        Ok(OrchestratorSettings {
            replication: ReplicationSettings {
                user: self.replication.user.clone(),
                password: self.replication_password()?,
                source_host,
                source_port,
            },
            verification: self.verification.policy(),
            rollback_on_failure: self.verification.rollback_on_failure,
        })
    }

    fn replication_password(&self) -> anyhow::Result<String> {
        resolve_secret(
            "replication password",
            &self.replication.password,
            self.replication.password_env.as_deref(),
            self.requires_secrets(),
        )
    }

    fn requires_secrets(&self) -> bool {
        self.backend.kind != BackendKind::Simulated
    }
}

/// Reads a secret from its environment variable, falling back to the
/// inline value.
fn resolve_secret(what: &str, inline: &str, env: Option<&str>, required: bool) -> anyhow::Result<String> {
    if let Some(var) = env {
        if let Ok(value) = std::env::var(var) {
            return Ok(value);
        }
    }
    if !inline.is_empty() || !required {
        return Ok(inline.to_string());
    }
    match env {
        Some(var) => anyhow::bail!("The {} is not set: environment variable {} is missing", what, var),
        None => anyhow::bail!("The {} is not set", what),
    }
}
