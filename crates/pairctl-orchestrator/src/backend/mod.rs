//! Command executor backends.
//!
//! [`CommandExecutor`] is the only way the rest of the crate touches a
//! database node. Three backends implement it: local client processes,
//! clients run inside containers through the Docker API, and an in-memory
//! simulation for tests and dry runs.

mod docker;
mod process;
mod simulated;
mod r#trait;

pub use docker::{DockerExecutor, DockerExecutorConfig};
pub use process::{ProcessExecutor, ProcessExecutorConfig};
pub use r#trait::{classify_output, CommandExecutor, ExecOutput, SharedExecutor};
pub use simulated::{SimulatedExecutor, SimulatedSource, SimulatedState};
