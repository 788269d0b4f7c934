//! pairctl - runbook automation for a MySQL primary/replica pair.
//!
//! Every command maps to one orchestrator or lifecycle operation and prints
//! a text table, or JSON with `--json`.
//!
//! # Usage
//!
//! ```bash
//! # Show nodes, replication links and databases
//! pairctl --config pairctl.toml status
//!
//! # Provision the replica from a fresh snapshot of the primary
//! pairctl --config pairctl.toml provision
//!
//! # Replace a database on the primary from a dump and resync the replica
//! pairctl --config pairctl.toml refresh shop --dump /backups/shop.sql
//!
//! # Rehearse against an in-memory pair
//! pairctl --backend simulated provision
//! ```
//!
//! # Exit codes
//!
//! - 0: success
//! - 1: the operation failed, or another operation holds the replica
//! - 2: invalid arguments or configuration
//! - 3: a replica did not reach the expected state in time

mod config;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{BackendKind, PairctlConfig};
use pairctl_core::{ModelError, NodeId, NodeRole, Operation, SnapshotId, TopologyState};
use pairctl_history::StateDir;
use pairctl_orchestrator::backend::{DockerExecutor, ProcessExecutor, SimulatedExecutor};
use pairctl_orchestrator::compose::generate_compose_yaml;
use pairctl_orchestrator::{
    CancelSignal, LifecycleController, OrchestratorError, ProvisioningOrchestrator, RunOutcome, SharedExecutor,
};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for pairctl.
#[derive(Parser, Debug)]
#[command(
    name = "pairctl",
    about = "Runbook automation for a MySQL primary/replica pair and its phpMyAdmin front end",
    version
)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    /// Enable JSON log output.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Command executor backend.
    #[arg(long, value_enum, global = true)]
    backend: Option<BackendKind>,

    /// State directory holding the journal, snapshots and locks.
    #[arg(long, value_name = "DIR", global = true)]
    state_dir: Option<PathBuf>,

    /// Print the default configuration and exit.
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Provision a replica from a fresh snapshot of the primary.
    Provision {
        /// Replica name; defaults to the first replica.
        #[arg(long)]
        replica: Option<String>,
    },
    /// Show nodes, replication links and databases.
    Status,
    /// Replace a database on the primary from a dump and resync the replica.
    Refresh {
        /// Database to replace.
        database: String,
        /// SQL dump to import.
        #[arg(long, value_name = "FILE")]
        dump: PathBuf,
        /// Replica name; defaults to the first replica.
        #[arg(long)]
        replica: Option<String>,
    },
    /// Create a database on the primary and wait for it on the replica.
    AddDatabase {
        /// Database name.
        name: String,
        /// Replica name; defaults to the first replica.
        #[arg(long)]
        replica: Option<String>,
    },
    /// Drop a database on the primary and wait for it to vanish on the replica.
    RemoveDatabase {
        /// Database name.
        name: String,
        /// Replica name; defaults to the first replica.
        #[arg(long)]
        replica: Option<String>,
    },
    /// Resume a timed-out verification, or check that the replica streams.
    Verify {
        /// Replica name; defaults to the first replica.
        #[arg(long)]
        replica: Option<String>,
    },
    /// Wait for a node to stream again after a restart.
    Recover {
        /// Node name.
        node: String,
        /// Restart the node first.
        #[arg(long)]
        restart: bool,
    },
    /// Render the docker-compose manifest for the pair and phpMyAdmin.
    Compose {
        /// Write the manifest here instead of standard output.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Inspect or purge stored snapshots.
    Snapshots {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
    /// List journaled operations.
    Operations,
    /// Compact the journal to the latest record of each operation.
    Compact {
        /// Finished operations to keep, newest first.
        #[arg(long, default_value_t = 50)]
        keep: usize,
    },
    /// Release a replica lock left behind by a dead run.
    Unlock {
        /// Replica name.
        replica: String,
    },
}

#[derive(Subcommand, Debug, Clone)]
enum SnapshotCommand {
    /// List stored snapshots.
    List,
    /// Delete a snapshot.
    Purge {
        /// Snapshot id.
        #[arg(value_parser = parse_snapshot_id)]
        id: SnapshotId,
    },
}

fn parse_snapshot_id(value: &str) -> std::result::Result<SnapshotId, String> {
    value.parse().map_err(|e| format!("invalid snapshot id: {}", e))
}

/// Loaded configuration, topology and the components built from them.
struct App {
    config: PairctlConfig,
    topology: TopologyState,
    orchestrator: Arc<ProvisioningOrchestrator>,
    controller: LifecycleController,
    json: bool,
}

impl App {
    async fn new(config: PairctlConfig, json: bool, cancel: CancelSignal) -> Result<Self> {
        let topology = config.topology()?;
        let executor = build_executor(&config, &topology)?;
        let settings = config.orchestrator_settings(&topology)?;

        let state_dir = StateDir::open(&config.state.dir, config.state.sync_on_write)
            .await
            .with_context(|| format!("Failed to open state directory {}", config.state.dir.display()))?;
        info!(
            backend = executor.name(),
            state_dir = %config.state.dir.display(),
            nodes = topology.node_count(),
            "pairctl ready"
        );

        let orchestrator = Arc::new(ProvisioningOrchestrator::new(executor, state_dir, settings).with_cancel(cancel));
        let controller = LifecycleController::new(orchestrator.clone(), config.recovery.policy());

        Ok(Self {
            config,
            topology,
            orchestrator,
            controller,
            json,
        })
    }

    async fn observe(&self) -> TopologyState {
        self.orchestrator.reader().refresh(self.topology.clone()).await
    }

    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Status => {
                let state = self.observe().await;
                self.emit(&state, || output::topology_table(&state))
            }
            Command::Provision { replica } => {
                let replica = self.replica(replica.as_deref())?;
                let outcome = self.orchestrator.provision(self.observe().await, replica).await?;
                self.emit_outcome(&outcome)
            }
            Command::Refresh {
                database,
                dump,
                replica,
            } => {
                let replica = self.replica(replica.as_deref())?;
                let outcome = self
                    .controller
                    .refresh(self.observe().await, replica, &database, &dump)
                    .await?;
                self.emit_outcome(&outcome)
            }
            Command::AddDatabase { name, replica } => {
                let replica = self.replica(replica.as_deref())?;
                let outcome = self
                    .orchestrator
                    .add_database(self.observe().await, replica, &name)
                    .await?;
                self.emit_outcome(&outcome)
            }
            Command::RemoveDatabase { name, replica } => {
                let replica = self.replica(replica.as_deref())?;
                let outcome = self
                    .orchestrator
                    .remove_database(self.observe().await, replica, &name)
                    .await?;
                self.emit_outcome(&outcome)
            }
            Command::Verify { replica } => {
                let replica = self.replica(replica.as_deref())?;
                let outcome = self.orchestrator.verify(self.observe().await, replica).await?;
                self.emit_outcome(&outcome)
            }
            Command::Recover { node, restart } => {
                let node = self.topology.node_by_name(&node)?.id;
                let state = self.controller.recover(self.observe().await, node, restart).await?;
                self.emit(&state, || output::topology_table(&state))
            }
            Command::Compose { output } => {
                let manifest = generate_compose_yaml(&self.topology, &self.config.admin_ui)?;
                match output {
                    Some(path) => {
                        std::fs::write(&path, &manifest)
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                        let report = serde_json::json!({ "manifest": path });
                        self.emit(&report, || format!("wrote {}\n", path.display()))
                    }
                    None => {
                        print!("{}", manifest);
                        Ok(())
                    }
                }
            }
            Command::Snapshots { command } => self.snapshots(command).await,
            Command::Operations => {
                let operations = self.orchestrator.operations().await?;
                self.emit(&operations, || output::operations_table(&operations))
            }
            Command::Compact { keep } => {
                let report = self.orchestrator.compact_journal(keep).await?;
                self.emit(&report, || output::compaction(&report))
            }
            Command::Unlock { replica } => {
                let replica = self.replica(Some(&replica))?;
                let released = self.orchestrator.unlock(replica)?;
                if let Some(info) = &released {
                    warn!(operation = %info.operation, pid = info.pid, "Lock released by operator");
                }
                self.emit(&released, || output::released_lock(&self.topology, replica, released.as_ref()))
            }
        }
    }

    async fn snapshots(&self, command: SnapshotCommand) -> Result<()> {
        let store = self.orchestrator.snapshots();
        match command {
            SnapshotCommand::List => {
                let snapshots = store.list().await?;
                self.emit(&snapshots, || output::snapshots_table(&snapshots))
            }
            SnapshotCommand::Purge { id } => {
                let snapshot = store.load(id).await.context("Unknown snapshot")?;
                if !snapshot.is_consumed() {
                    warn!(snapshot = %id.short(), "Purging a snapshot that was never restored");
                }
                store.purge(id).await?;
                let report = serde_json::json!({ "purged": id });
                self.emit(&report, || format!("purged snapshot {}\n", id))
            }
        }
    }

    /// Resolves a replica by name, defaulting to the first replica.
    fn replica(&self, name: Option<&str>) -> Result<NodeId> {
        let node = match name {
            Some(name) => self.topology.node_by_name(name)?,
            None => self
                .topology
                .replicas()
                .next()
                .ok_or_else(|| OrchestratorError::configuration("topology has no replica"))?,
        };
        if node.role != NodeRole::Replica {
            return Err(OrchestratorError::configuration(format!("{} is not a replica", node.name)).into());
        }
        Ok(node.id)
    }

    fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            print!("{}", text());
        }
        Ok(())
    }

    fn emit_outcome(&self, outcome: &RunOutcome) -> Result<()> {
        let report = OutcomeReport {
            operation: outcome.operation.as_ref(),
            topology: &outcome.state,
        };
        self.emit(&report, || {
            let mut text = String::new();
            if let Some(op) = &outcome.operation {
                text.push_str(&output::operation_summary(op));
                text.push('\n');
            }
            text.push_str(&output::topology_table(&outcome.state));
            text
        })
    }
}

#[derive(Serialize)]
struct OutcomeReport<'a> {
    operation: Option<&'a Operation>,
    topology: &'a TopologyState,
}

fn build_executor(config: &PairctlConfig, topology: &TopologyState) -> Result<SharedExecutor> {
    let executor: SharedExecutor = match config.backend.kind {
        BackendKind::Process => Arc::new(ProcessExecutor::new(config.backend.process.clone())),
        BackendKind::Docker => Arc::new(
            DockerExecutor::new(config.backend.docker.clone()).context("Failed to connect to the Docker daemon")?,
        ),
        BackendKind::Simulated => Arc::new(SimulatedExecutor::new(topology)),
    };
    Ok(executor)
}

/// Loads, merges and validates the configuration.
fn load_config(args: &CliArgs) -> Result<PairctlConfig> {
    let mut config = if let Some(ref config_path) = args.config {
        PairctlConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        PairctlConfig::default()
    };

    config.merge_cli_args(args);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Initialize tracing/logging.
fn init_tracing(config: &config::LoggingConfig, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Failed to parse log filter")?;

    let format = if json_logs || config.format == "json" {
        "json"
    } else {
        &config.format
    };

    // Logs go to stderr so command output stays parseable.
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;
        }
    }

    Ok(())
}

/// Sets `cancel` on Ctrl-C. The running step finishes first.
fn install_interrupt_handler(cancel: CancelSignal) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping after the current step");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Cannot install Ctrl-C handler"),
        }
    });
}

const EXIT_FAILED: u8 = 1;
const EXIT_USAGE: u8 = 2;
const EXIT_TIMEOUT: u8 = 3;

/// Maps an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    if let Some(e) = err.downcast_ref::<OrchestratorError>() {
        if e.is_timeout() {
            return EXIT_TIMEOUT;
        }
        return match e {
            OrchestratorError::Configuration(_) => EXIT_USAGE,
            _ => EXIT_FAILED,
        };
    }
    if err.downcast_ref::<ModelError>().is_some() {
        return EXIT_USAGE;
    }
    EXIT_FAILED
}

/// Prints an error the way an operator needs to act on it.
fn report(err: &anyhow::Error, topology: Option<&TopologyState>) {
    let name = |id: NodeId| {
        topology
            .and_then(|t| t.node(id).ok())
            .map(|n| n.name.clone())
            .unwrap_or_else(|| id.to_string())
    };

    match err.downcast_ref::<OrchestratorError>() {
        Some(OrchestratorError::OperationInProgress { replica, operation }) => {
            eprintln!(
                "pairctl: {} is busy: operation {} is in progress.\n\
                 Wait for it to finish, or run `pairctl unlock {}` if its process is gone.",
                name(*replica),
                operation.short(),
                name(*replica)
            );
        }
        Some(OrchestratorError::StepFailed {
            compensation_errors, ..
        }) if !compensation_errors.is_empty() => {
            eprintln!("pairctl: {:#}", err);
            eprintln!("rollback was incomplete:");
            for e in compensation_errors {
                eprintln!("  {}", e);
            }
        }
        Some(e) if e.is_timeout() => {
            eprintln!("pairctl: {:#}", err);
            eprintln!("run `pairctl verify` to keep waiting, or `pairctl status` to inspect the pair.");
        }
        _ => eprintln!("pairctl: {:#}", err),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    if args.print_config {
        return match toml::to_string_pretty(&PairctlConfig::default()) {
            Ok(text) => {
                println!("{}", text);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("pairctl: {}", e);
                ExitCode::from(EXIT_FAILED)
            }
        };
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("pairctl: {:#}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if let Err(e) = init_tracing(&config.logging, args.json_logs) {
        eprintln!("pairctl: {:#}", e);
        return ExitCode::from(EXIT_USAGE);
    }

    let Some(command) = args.command.clone() else {
        eprintln!("pairctl: no command given; see `pairctl --help`");
        return ExitCode::from(EXIT_USAGE);
    };

    let cancel = CancelSignal::new();
    install_interrupt_handler(cancel.clone());

    let app = match App::new(config, args.json, cancel).await {
        Ok(app) => app,
        Err(e) => {
            report(&e, None);
            return ExitCode::from(exit_code(&e));
        }
    };

    match app.run(command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e, Some(&app.topology));
            ExitCode::from(exit_code(&e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_args_parsing() {
        let args = CliArgs::parse_from(["pairctl", "status"]);
        assert!(args.config.is_none());
        assert!(!args.json);
        assert!(matches!(args.command, Some(Command::Status)));
    }

    #[test]
    fn test_cli_args_with_options() {
        let args = CliArgs::parse_from([
            "pairctl",
            "refresh",
            "shop",
            "--dump",
            "/backups/shop.sql",
            "--json",
            "--backend",
            "simulated",
            "--log-level",
            "debug",
        ]);
        assert!(args.json);
        assert_eq!(args.backend, Some(BackendKind::Simulated));
        assert_eq!(args.log_level, Some("debug".to_string()));
        match args.command {
            Some(Command::Refresh { database, dump, replica }) => {
                assert_eq!(database, "shop");
                assert_eq!(dump, PathBuf::from("/backups/shop.sql"));
                assert!(replica.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_refresh_requires_dump() {
        assert!(CliArgs::try_parse_from(["pairctl", "refresh", "shop"]).is_err());
    }

    #[test]
    fn test_snapshot_purge_parses_id() {
        let id = SnapshotId::new();
        let args = CliArgs::parse_from(["pairctl", "snapshots", "purge", &id.to_string()]);
        assert!(matches!(
            args.command,
            Some(Command::Snapshots {
                command: SnapshotCommand::Purge { id: parsed }
            }) if parsed == id
        ));
        assert!(CliArgs::try_parse_from(["pairctl", "snapshots", "purge", "nope"]).is_err());
    }

    #[test]
    fn test_config_merge() {
        let mut config = PairctlConfig::default();
        let args = CliArgs::parse_from([
            "pairctl",
            "--backend",
            "docker",
            "--state-dir",
            "/tmp/pairctl-state",
            "-l",
            "warn",
            "status",
        ]);
        config.merge_cli_args(&args);
        assert_eq!(config.backend.kind, BackendKind::Docker);
        assert_eq!(config.state.dir, PathBuf::from("/tmp/pairctl-state"));
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_exit_codes() {
        let timeout = OrchestratorError::VerificationTimeout {
            replica: NodeId(2),
            condition: "streaming".into(),
            attempts: 3,
            elapsed_secs: 3,
        };
        assert_eq!(exit_code(&anyhow::Error::new(timeout)), EXIT_TIMEOUT);

        let busy = OrchestratorError::OperationInProgress {
            replica: NodeId(2),
            operation: pairctl_core::OperationId::new(),
        };
        assert_eq!(exit_code(&anyhow::Error::new(busy)), EXIT_FAILED);

        let invalid = anyhow::Error::new(OrchestratorError::configuration("bad")).context("while refreshing");
        assert_eq!(exit_code(&invalid), EXIT_USAGE);

        let unknown = anyhow::Error::new(ModelError::unknown_node("mysql-9"));
        assert_eq!(exit_code(&unknown), EXIT_USAGE);

        let wrapped_timeout = OrchestratorError::StepFailed {
            operation: pairctl_core::OperationId::new(),
            step: "verifying".into(),
            last_good: Some("arming-replication".into()),
            source: Box::new(OrchestratorError::RecoveryTimeout {
                replica: NodeId(2),
                attempts: 5,
                elapsed_secs: 10,
            }),
            compensation_errors: Vec::new(),
        };
        assert_eq!(exit_code(&anyhow::Error::new(wrapped_timeout)), EXIT_TIMEOUT);
    }

    #[tokio::test]
    async fn test_simulated_status_and_compose() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = PairctlConfig::default();
        config.backend.kind = BackendKind::Simulated;
        config.state.dir = temp_dir.path().join("state");
        config.state.sync_on_write = false;
        config.validate().unwrap();

        let app = App::new(config, true, CancelSignal::new()).await.unwrap();
        app.run(Command::Status).await.unwrap();
        app.run(Command::Compose {
            output: Some(temp_dir.path().join("compose.yml")),
        })
        .await
        .unwrap();
        let manifest = std::fs::read_to_string(temp_dir.path().join("compose.yml")).unwrap();
        assert!(manifest.contains("phpmyadmin"));

        let err = app
            .run(Command::Verify {
                replica: Some("mysql-primary".into()),
            })
            .await
            .unwrap_err();
        assert_eq!(exit_code(&err), EXIT_USAGE);
    }

    #[tokio::test]
    async fn test_simulated_provision_then_operations() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = PairctlConfig::default();
        config.backend.kind = BackendKind::Simulated;
        config.state.dir = temp_dir.path().join("state");
        config.state.sync_on_write = false;
        config.verification.interval_ms = 10;
        config.verification.timeout_secs = 2;

        let app = App::new(config, false, CancelSignal::new()).await.unwrap();
        app.run(Command::Provision { replica: None }).await.unwrap();

        let operations = app.orchestrator.operations().await.unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].state, pairctl_core::OperationState::Completed);
        app.run(Command::Operations).await.unwrap();

        app.run(Command::Compact { keep: 0 }).await.unwrap();
        assert!(app.orchestrator.operations().await.unwrap().is_empty());
        app.run(Command::Snapshots {
            command: SnapshotCommand::List,
        })
        .await
        .unwrap();
    }
}
