//! Node Registry
//!
//! Ordered collection of every node this process has heard of. Entries are
//! keyed by node id and iterate in ascending id order; the quorum device
//! lives under the reserved id 0 and therefore always sorts first.

use std::collections::BTreeMap;

use super::node::{ClusterNode, NodeFlags, NodeId, NodeState, LOCAL_NODE_ID, QUORUM_DEVICE_ID};
use crate::config::DEFAULT_EXPECTED_VOTES;
use crate::error::{Error, Result};

/// Upper bound on real nodes, matching the transport's processor limit
pub const MAX_NODES: usize = 384;

/// Registry of known cluster nodes
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    /// This node's ID
    local_id: NodeId,
    /// All known nodes (including self and the quorum device)
    nodes: BTreeMap<NodeId, ClusterNode>,
}

impl NodeRegistry {
    /// Create a registry holding only the local node
    pub fn new(local_id: NodeId) -> Self {
        let mut local = ClusterNode::new(local_id);
        local.flags.insert(NodeFlags::LOCAL);
        local.state = NodeState::Member;
        local.votes = 1;
        local.expected_votes = DEFAULT_EXPECTED_VOTES;

        let mut nodes = BTreeMap::new();
        nodes.insert(local_id, local);

        Self { local_id, nodes }
    }

    /// Get this node's ID
    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Get this node's entry
    pub fn local(&self) -> &ClusterNode {
        self.nodes.get(&self.local_id).expect("Local node must exist")
    }

    /// Get this node's entry mutably
    pub fn local_mut(&mut self) -> &mut ClusterNode {
        self.nodes.get_mut(&self.local_id).expect("Local node must exist")
    }

    fn resolve(&self, node_id: NodeId) -> NodeId {
        if node_id == LOCAL_NODE_ID {
            self.local_id
        } else {
            node_id
        }
    }

    /// Look up a node; the local sentinel resolves to this node
    pub fn find(&self, node_id: NodeId) -> Option<&ClusterNode> {
        self.nodes.get(&self.resolve(node_id))
    }

    /// Look up a node mutably
    pub fn find_mut(&mut self, node_id: NodeId) -> Option<&mut ClusterNode> {
        let id = self.resolve(node_id);
        self.nodes.get_mut(&id)
    }

    /// Insert a zeroed entry for `node_id`, or return the existing one
    pub fn allocate(&mut self, node_id: NodeId) -> Result<&mut ClusterNode> {
        if !self.nodes.contains_key(&node_id) && self.len() >= MAX_NODES {
            return Err(Error::ResourceExhausted(format!(
                "cannot track node {}: registry holds {} nodes",
                node_id, MAX_NODES
            )));
        }
        Ok(self
            .nodes
            .entry(node_id)
            .or_insert_with(|| ClusterNode::new(node_id)))
    }

    /// All real nodes in ascending id order, tombstones included
    pub fn members(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.values().filter(|n| !n.is_quorum_device())
    }

    /// All real nodes, mutably
    pub fn members_mut(&mut self) -> impl Iterator<Item = &mut ClusterNode> {
        self.nodes.values_mut().filter(|n| !n.is_quorum_device())
    }

    /// Real nodes currently in `Member` state
    pub fn active_members(&self) -> impl Iterator<Item = &ClusterNode> {
        self.members().filter(|n| n.is_member())
    }

    /// Every entry including the quorum device, in ascending id order
    pub fn all(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.values()
    }

    /// Number of real nodes
    pub fn len(&self) -> usize {
        self.members().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lowest id among real nodes in `Member` state
    pub fn lowest_active_member_id(&self) -> Option<NodeId> {
        self.active_members().map(|n| n.node_id).next()
    }

    /// Whether `node_id` is a real node currently in `Member` state
    pub fn is_active_member(&self, node_id: NodeId) -> bool {
        self.active_members().any(|n| n.node_id == node_id)
    }

    /// The registered quorum device, if any
    pub fn quorum_device(&self) -> Option<&ClusterNode> {
        self.nodes.get(&QUORUM_DEVICE_ID)
    }

    pub fn quorum_device_mut(&mut self) -> Option<&mut ClusterNode> {
        self.nodes.get_mut(&QUORUM_DEVICE_ID)
    }

    /// Register the quorum device pseudo-node in `Dead` state
    pub fn insert_quorum_device(&mut self, votes: u32) -> Result<&mut ClusterNode> {
        if self.nodes.contains_key(&QUORUM_DEVICE_ID) {
            return Err(Error::AlreadyExists("quorum device already registered".into()));
        }
        let mut device = ClusterNode::new(QUORUM_DEVICE_ID);
        device.state = NodeState::Dead;
        device.votes = votes;
        device.flags.insert(NodeFlags::QUORUM_DEVICE);
        Ok(self.nodes.entry(QUORUM_DEVICE_ID).or_insert(device))
    }

    /// Remove the quorum device pseudo-node
    pub fn remove_quorum_device(&mut self) -> Option<ClusterNode> {
        self.nodes.remove(&QUORUM_DEVICE_ID)
    }
}
