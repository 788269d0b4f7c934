//! pairctl core - model types for a primary/replica database pair.
//!
//! This crate provides the values that flow between the runbook components:
//!
//! - [`node`]: Node identity, role, address, credentials and last-known status
//! - [`link`]: Replication links and opaque position tokens
//! - [`snapshot`]: Point-in-time exports of primary state
//! - [`operation`]: Multi-step workflows, their steps and compensations
//! - [`topology`]: The explicit topology value passed through every call
//! - [`error`]: Model invariant violations
//!
//! # Example
//!
//! ```
//! use pairctl_core::link::{LinkState, ReplicationLink};
//! use pairctl_core::node::{Credentials, Node, NodeAddress, NodeId, NodeRole};
//! use pairctl_core::topology::TopologyState;
//!
//! let primary = Node::new(
//!     NodeId::new(1),
//!     "mysql-primary",
//!     NodeRole::Primary,
//!     NodeAddress::new("127.0.0.1", 3306),
//!     Credentials::new("root", "secret"),
//! );
//! let replica = Node::new(
//!     NodeId::new(2),
//!     "mysql-replica",
//!     NodeRole::Replica,
//!     NodeAddress::new("127.0.0.1", 3307),
//!     Credentials::new("root", "secret"),
//! );
//!
//! let mut topology = TopologyState::new("shop");
//! topology.add_node(primary).unwrap();
//! topology.add_node(replica).unwrap();
//!
//! let link = ReplicationLink::new(NodeId::new(2), NodeId::new(1)).with_state(LinkState::Streaming);
//! topology.set_link(link).unwrap();
//!
//! assert!(topology.link_for(NodeId::new(2)).unwrap().is_streaming());
//! assert_eq!(topology.inbound_links(NodeId::new(1)).count(), 1);
//! ```

pub mod error;
pub mod link;
pub mod node;
pub mod operation;
pub mod snapshot;
pub mod topology;

pub use error::{ModelError, Result};
pub use link::{LinkState, PositionToken, ReplicationLink};
pub use node::{Credentials, Node, NodeAddress, NodeId, NodeRole, NodeStatus};
pub use operation::{
    Compensation, Operation, OperationId, OperationKind, OperationState, Step, StepOutcome,
    StepRecord,
};
pub use snapshot::{Snapshot, SnapshotId};
pub use topology::TopologyState;
