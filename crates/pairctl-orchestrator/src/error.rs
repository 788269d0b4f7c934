//! Error types for the orchestrator crate.
//!
//! Executor errors (`Connection`, `Auth`, `Command`) propagate unchanged
//! until the step runner wraps them in [`OrchestratorError::StepFailed`],
//! which names the failed step and the last step that was known good.

use pairctl_core::{ModelError, NodeId, OperationId};
use pairctl_history::HistoryError;
use thiserror::Error;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Errors that can occur while driving the pair.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The node could not be reached.
    #[error("cannot connect to {node}: {reason}")]
    Connection {
        /// The node name.
        node: String,
        /// The client or runtime error.
        reason: String,
    },

    /// The node rejected the credentials.
    #[error("access denied on {node}: {reason}")]
    Auth {
        /// The node name.
        node: String,
        /// The client error.
        reason: String,
    },

    /// The command ran and exited non-zero.
    #[error("{command} failed on {node} with exit code {exit_code}: {stderr}")]
    Command {
        /// The node name.
        node: String,
        /// The command kind.
        command: String,
        /// Exit code of the client.
        exit_code: i32,
        /// Standard error of the client.
        stderr: String,
    },

    /// Status output had an unrecognized format.
    #[error("cannot parse status of {node}: {reason}")]
    Parse {
        /// The node name.
        node: String,
        /// What could not be parsed.
        reason: String,
    },

    /// The replica did not reach the expected state in time.
    #[error("verification of {replica} timed out after {attempts} attempts ({elapsed_secs}s): {condition}")]
    VerificationTimeout {
        /// The replica being verified.
        replica: NodeId,
        /// What was awaited.
        condition: String,
        /// Number of polls made.
        attempts: u32,
        /// Seconds spent polling.
        elapsed_secs: u64,
    },

    /// The replica did not recover within the retry budget.
    #[error("recovery of {replica} gave up after {attempts} attempts ({elapsed_secs}s); manual intervention required")]
    RecoveryTimeout {
        /// The replica being recovered.
        replica: NodeId,
        /// Number of polls made.
        attempts: u32,
        /// Seconds spent polling.
        elapsed_secs: u64,
    },

    /// Another operation holds the replica.
    #[error("operation {operation} is already in progress against {replica}")]
    OperationInProgress {
        /// The locked replica.
        replica: NodeId,
        /// The operation holding the lock.
        operation: OperationId,
    },

    /// A step of an operation failed.
    #[error("{operation} failed at {step} (last good step: {}): {source}", .last_good.as_deref().unwrap_or("none"))]
    StepFailed {
        /// The operation.
        operation: OperationId,
        /// The failed step.
        step: String,
        /// The last completed or skipped step.
        last_good: Option<String>,
        /// The underlying error.
        #[source]
        source: Box<OrchestratorError>,
        /// Compensations that failed while rolling back.
        compensation_errors: Vec<String>,
    },

    /// The operator interrupted the operation between steps.
    #[error("operation {operation} cancelled before {step}")]
    Cancelled {
        /// The operation.
        operation: OperationId,
        /// The step that was not started.
        step: String,
    },

    /// Backend capability not supported.
    #[error("capability not supported: {0}")]
    CapabilityNotSupported(String),

    /// Invalid configuration or arguments.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No resumable operation matched.
    #[error("no resumable operation: {0}")]
    NothingToResume(String),

    /// Docker API error.
    #[error("Docker API error: {0}")]
    DockerApi(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Journal, snapshot catalog or lock error.
    #[error(transparent)]
    History(HistoryError),

    /// Model invariant violated.
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl OrchestratorError {
    /// Creates a connection error.
    pub fn connection(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Creates an auth error.
    pub fn auth(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Auth {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Creates a command error.
    pub fn command(
        node: impl Into<String>,
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
    ) -> Self {
        Self::Command {
            node: node.into(),
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Creates a parse error.
    pub fn parse(node: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            node: node.into(),
            reason: reason.into(),
        }
    }

    /// Creates a capability not supported error.
    pub fn capability_not_supported(cap: impl Into<String>) -> Self {
        Self::CapabilityNotSupported(cap.into())
    }

    /// Creates a configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Returns true if the caller may retry the same call.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Parse { .. } | Self::DockerApi(_) | Self::Io(_)
        )
    }

    /// Returns true for the two operator-actionable timeouts.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::VerificationTimeout { .. } | Self::RecoveryTimeout { .. } => true,
            Self::StepFailed { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Returns the innermost error, looking through `StepFailed`.
    pub fn root(&self) -> &OrchestratorError {
        match self {
            Self::StepFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<HistoryError> for OrchestratorError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::Locked {
                replica, operation, ..
            } => Self::OperationInProgress { replica, operation },
            HistoryError::Model(e) => Self::Model(e),
            other => Self::History(other),
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for OrchestratorError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::command("mysql-2", "start-replica", 1, "ERROR 3081");
        assert_eq!(
            err.to_string(),
            "start-replica failed on mysql-2 with exit code 1: ERROR 3081"
        );

        let op = OperationId::new();
        let err = OrchestratorError::StepFailed {
            operation: op,
            step: "restoring".into(),
            last_good: Some("snapshotting".into()),
            source: Box::new(OrchestratorError::connection("mysql-2", "refused")),
            compensation_errors: Vec::new(),
        };
        assert_eq!(
            err.to_string(),
            format!(
                "{} failed at restoring (last good step: snapshotting): cannot connect to mysql-2: refused",
                op
            )
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(OrchestratorError::connection("n", "refused").is_retryable());
        assert!(OrchestratorError::parse("n", "garbage").is_retryable());
        assert!(!OrchestratorError::auth("n", "denied").is_retryable());
        assert!(!OrchestratorError::command("n", "x", 1, "").is_retryable());
    }

    #[test]
    fn test_timeout_through_step_failure() {
        let err = OrchestratorError::StepFailed {
            operation: OperationId::new(),
            step: "verifying".into(),
            last_good: Some("arming-replication".into()),
            source: Box::new(OrchestratorError::VerificationTimeout {
                replica: NodeId(2),
                condition: "streaming".into(),
                attempts: 3,
                elapsed_secs: 1,
            }),
            compensation_errors: Vec::new(),
        };
        assert!(err.is_timeout());
        assert!(matches!(
            err.root(),
            OrchestratorError::VerificationTimeout { .. }
        ));
    }

    #[test]
    fn test_lock_rejection_maps_to_in_progress() {
        let op = OperationId::new();
        let err: OrchestratorError = HistoryError::Locked {
            replica: NodeId(2),
            operation: op,
            pid: 1,
            host: "h".into(),
        }
        .into();
        assert!(matches!(
            err,
            OrchestratorError::OperationInProgress { operation, .. } if operation == op
        ));
    }
}
