//! Error types for model invariants.

use thiserror::Error;

use crate::node::NodeId;
use crate::snapshot::SnapshotId;

/// Result type for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Violations of the topology and operation model.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The node is not part of the topology.
    #[error("unknown node: {0}")]
    UnknownNode(String),

    /// A node with the same id or name is already defined.
    #[error("duplicate node: {0}")]
    DuplicateNode(String),

    /// The topology has no primary node.
    #[error("topology has no primary node")]
    NoPrimary,

    /// The topology already has a primary node.
    #[error("topology already has a primary node: {0}")]
    SecondPrimary(String),

    /// A link endpoint has the wrong role.
    #[error("invalid link {replica} -> {primary}: {reason}")]
    InvalidLink {
        /// The replica end of the link.
        replica: NodeId,
        /// The primary end of the link.
        primary: NodeId,
        /// Why the link was rejected.
        reason: String,
    },

    /// A snapshot may only be restored once.
    #[error("snapshot {0} has already been consumed")]
    SnapshotConsumed(SnapshotId),

    /// Invalid operation state transition.
    #[error("invalid operation transition from {from} to {to}")]
    InvalidTransition {
        /// The current state.
        from: String,
        /// The requested state.
        to: String,
    },

    /// A step index outside the operation's step list.
    #[error("operation has no step at index {0}")]
    NoSuchStep(usize),
}

impl ModelError {
    /// Creates an unknown node error.
    pub fn unknown_node(node: impl ToString) -> Self {
        Self::UnknownNode(node.to_string())
    }

    /// Creates an invalid link error.
    pub fn invalid_link(replica: NodeId, primary: NodeId, reason: impl Into<String>) -> Self {
        Self::InvalidLink {
            replica,
            primary,
            reason: reason.into(),
        }
    }

    /// Creates an invalid transition error.
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}
