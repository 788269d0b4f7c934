//! Runbook automation for a MySQL primary/replica pair.
//!
//! This crate sequences the administrative steps an operator would otherwise
//! run by hand against the pair: provisioning a replica, adding and removing
//! databases, refreshing a database from an external dump, and recovering
//! after a restart.
//!
//! # Architecture
//!
//! - [`backend`]: the [`CommandExecutor`](backend::CommandExecutor) seam and
//!   its process, Docker and simulated implementations
//! - [`command`]: administrative commands and their client rendering
//! - [`status`]: the topology reader, which parses replica status output
//! - [`provision`]: the step runner with journaling, guards and rollback
//! - [`lifecycle`]: restart recovery and refresh-from-snapshot
//! - [`retry`]: bounded polling shared by every wait
//! - [`compose`]: the container manifest for the pair and its admin UI
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pairctl_history::StateDir;
//! use pairctl_orchestrator::{
//!     backend::SimulatedExecutor,
//!     provision::{OrchestratorSettings, ProvisioningOrchestrator},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let topology = load_topology()?;
//!     let executor = Arc::new(SimulatedExecutor::new(&topology));
//!     let state_dir = StateDir::open("/var/lib/pairctl", true).await?;
//!
//!     let orchestrator =
//!         ProvisioningOrchestrator::new(executor, state_dir, OrchestratorSettings::default());
//!     let replica = topology.replicas().next().unwrap().id;
//!     let outcome = orchestrator.provision(topology, replica).await?;
//!     println!("{}", outcome.state.link_for(replica).unwrap().state);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cancel;
pub mod command;
pub mod compose;
pub mod error;
pub mod lifecycle;
pub mod provision;
pub mod retry;
pub mod status;

pub use backend::{CommandExecutor, ExecOutput, SharedExecutor};
pub use cancel::CancelSignal;
pub use command::AdminCommand;
pub use error::{OrchestratorError, Result};
pub use lifecycle::LifecycleController;
pub use provision::{OrchestratorSettings, ProvisioningOrchestrator, ReplicationSettings, RunOutcome};
pub use retry::{BackoffPolicy, PollOutcome};
pub use status::TopologyReader;
