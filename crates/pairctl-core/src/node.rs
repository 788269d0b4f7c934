//! Node identity, role and status types.
//!
//! A node is one database server of the pair. Nodes are defined when the
//! topology is loaded from configuration; only the topology state reader
//! updates their [`NodeStatus`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a node in the topology.
///
/// # Examples
///
/// ```
/// use pairctl_core::node::NodeId;
///
/// let node = NodeId(1);
/// assert_eq!(node.0, 1);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Creates a new NodeId with the given value.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the inner value of the NodeId.
    #[inline]
    pub const fn inner(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// The role a node plays in the pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Accepts writes and is the source of the replication stream.
    Primary,

    /// Applies the replication stream; read-only to clients.
    Replica,
}

impl NodeRole {
    /// Returns the name of this role.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Replica => "replica",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Network address of a node's client port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddress {
    /// Host name or IP address.
    pub host: String,

    /// Client port.
    pub port: u16,
}

impl NodeAddress {
    /// Creates a new address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Administrative credentials for a node.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// User name.
    pub user: String,

    /// Password. Never written out.
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl Credentials {
    /// Creates a new credential set.
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Last-known status of a node, as observed by the topology state reader.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not observed yet.
    #[default]
    Unknown,

    /// Reachable and reporting a recognized status.
    Online,

    /// Reachable, but its status output could not be interpreted.
    Degraded {
        /// What made the status unreadable.
        reason: String,
    },

    /// Not reachable with the configured address and credentials.
    Unreachable {
        /// The last connection error.
        reason: String,
    },
}

impl NodeStatus {
    /// Returns true if the node answered the last status read.
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Online | Self::Degraded { .. })
    }

    /// Returns a short label for tables.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Online => "online",
            Self::Degraded { .. } => "degraded",
            Self::Unreachable { .. } => "unreachable",
        }
    }
}

/// One database server of the pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: NodeId,

    /// Human-readable name, also used as the default container name.
    pub name: String,

    /// The role this node plays.
    pub role: NodeRole,

    /// Client address used by process-based executors and by replicas
    /// connecting to this node.
    pub address: NodeAddress,

    /// Container running this node, for container-exec backends.
    pub container: Option<String>,

    /// Administrative credentials.
    pub credentials: Credentials,

    /// Last-known status.
    #[serde(default)]
    pub status: NodeStatus,
}

impl Node {
    /// Creates a node with an unknown status.
    pub fn new(
        id: NodeId,
        name: impl Into<String>,
        role: NodeRole,
        address: NodeAddress,
        credentials: Credentials,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            address,
            container: None,
            credentials,
            status: NodeStatus::Unknown,
        }
    }

    /// Sets the container name.
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    /// Returns the container name, falling back to the node name.
    pub fn container_name(&self) -> &str {
        self.container.as_deref().unwrap_or(&self.name)
    }

    /// Returns true if this node is the primary.
    pub fn is_primary(&self) -> bool {
        self.role == NodeRole::Primary
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.role, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new(
            NodeId::new(1),
            "mysql-primary",
            NodeRole::Primary,
            NodeAddress::new("db1", 3306),
            Credentials::new("root", "hunter2"),
        )
    }

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId(42).to_string(), "Node(42)");
    }

    #[test]
    fn test_node_id_serialization() {
        let json = serde_json::to_string(&NodeId(7)).unwrap();
        assert_eq!(json, "7");
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let debug = format!("{:?}", Credentials::new("root", "hunter2"));
        assert!(debug.contains("root"));
        assert!(!debug.contains("hunter2"));

        let json = serde_json::to_string(&Credentials::new("root", "hunter2")).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_container_name_fallback() {
        let n = node();
        assert_eq!(n.container_name(), "mysql-primary");

        let n = node().with_container("stack_mysql-primary_1");
        assert_eq!(n.container_name(), "stack_mysql-primary_1");
    }

    #[test]
    fn test_status_reachability() {
        assert!(NodeStatus::Online.is_reachable());
        assert!(NodeStatus::Degraded {
            reason: "new format".into()
        }
        .is_reachable());
        assert!(!NodeStatus::Unknown.is_reachable());
        assert!(!NodeStatus::Unreachable {
            reason: "refused".into()
        }
        .is_reachable());
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&NodeRole::Replica).unwrap(), "\"replica\"");
        assert_eq!(node().to_string(), "mysql-primary (primary, db1:3306)");
    }
}
