//! The explicit topology value.
//!
//! A [`TopologyState`] is passed into and returned from every orchestrator
//! and controller call. It holds the nodes, the replication links (at most
//! one per replica) and the databases the pair manages.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ModelError, Result};
use crate::link::ReplicationLink;
use crate::node::{Node, NodeId, NodeRole, NodeStatus};

/// Nodes, links and managed databases of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopologyState {
    /// Topology name.
    pub name: String,

    /// Nodes by id.
    nodes: BTreeMap<NodeId, Node>,

    /// Replication links keyed by replica.
    links: BTreeMap<NodeId, ReplicationLink>,

    /// Databases replicated from the primary.
    pub databases: BTreeSet<String>,
}

impl TopologyState {
    /// Creates an empty topology.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds a node. Names and ids must be unique and there is one primary.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) || self.nodes.values().any(|n| n.name == node.name) {
            return Err(ModelError::DuplicateNode(node.name));
        }
        if node.role == NodeRole::Primary {
            if let Some(existing) = self.nodes.values().find(|n| n.is_primary()) {
                return Err(ModelError::SecondPrimary(existing.name.clone()));
            }
        }
        self.nodes.insert(node.id, node);
        Ok(())
    }

    /// Removes a node and every link that touches it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Node> {
        let node = self.nodes.remove(&id).ok_or_else(|| ModelError::unknown_node(id))?;
        self.links.retain(|replica, link| *replica != id && link.primary != id);
        Ok(node)
    }

    /// Returns a node by id.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or_else(|| ModelError::unknown_node(id))
    }

    /// Returns a node by name.
    pub fn node_by_name(&self, name: &str) -> Result<&Node> {
        self.nodes
            .values()
            .find(|n| n.name == name)
            .ok_or_else(|| ModelError::unknown_node(name))
    }

    /// Returns the primary.
    pub fn primary(&self) -> Result<&Node> {
        self.nodes
            .values()
            .find(|n| n.is_primary())
            .ok_or(ModelError::NoPrimary)
    }

    /// Returns all replicas in id order.
    pub fn replicas(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| n.role == NodeRole::Replica)
    }

    /// Returns all nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Replaces the last-known status of a node.
    pub fn set_status(&mut self, id: NodeId, status: NodeStatus) -> Result<()> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| ModelError::unknown_node(id))?;
        node.status = status;
        Ok(())
    }

    /// Installs or replaces the link of a replica.
    ///
    /// Links are keyed by replica, so a replica never has more than one.
    /// The replica end must be a replica and the source end the primary.
    pub fn set_link(&mut self, link: ReplicationLink) -> Result<()> {
        let replica = self.node(link.replica)?;
        if replica.role != NodeRole::Replica {
            return Err(ModelError::invalid_link(
                link.replica,
                link.primary,
                format!("{} is not a replica", replica.name),
            ));
        }
        let primary = self.node(link.primary)?;
        if primary.role != NodeRole::Primary {
            return Err(ModelError::invalid_link(
                link.replica,
                link.primary,
                format!("{} is not the primary", primary.name),
            ));
        }

        self.links.insert(link.replica, link);
        Ok(())
    }

    /// Removes the link of a replica.
    pub fn clear_link(&mut self, replica: NodeId) -> Option<ReplicationLink> {
        self.links.remove(&replica)
    }

    /// Returns the link of a replica.
    pub fn link_for(&self, replica: NodeId) -> Option<&ReplicationLink> {
        self.links.get(&replica)
    }

    /// Returns the links that read from `primary`.
    pub fn inbound_links(&self, primary: NodeId) -> impl Iterator<Item = &ReplicationLink> {
        self.links.values().filter(move |l| l.primary == primary)
    }

    /// Returns all links.
    pub fn links(&self) -> impl Iterator<Item = &ReplicationLink> {
        self.links.values()
    }

    /// Returns a copy with node statuses reset to unknown.
    ///
    /// Used to compare the replication shape of two observations without
    /// the volatile reachability fields.
    pub fn shape(&self) -> Self {
        let mut shape = self.clone();
        for node in shape.nodes.values_mut() {
            node.status = NodeStatus::Unknown;
        }
        for link in shape.links.values_mut() {
            link.lag_secs = None;
        }
        shape
    }
}
