//! Cluster Node
//!
//! A single entry of the node registry: vote weight, expected votes and
//! lifecycle state of one known member (or of the quorum device).

use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};

/// Group membership node identifier
pub type NodeId = u32;

/// Reserved id of the quorum device pseudo-node
pub const QUORUM_DEVICE_ID: NodeId = 0;

/// Sentinel accepted by client requests to mean "this node"
pub const LOCAL_NODE_ID: NodeId = u32::MAX;

/// Node state in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeState {
    /// Allocated but not yet heard from
    Joining,
    /// Counted towards quorum
    Member,
    /// Left the membership view, kept as a tombstone
    Dead,
    /// Announced a voluntary leave
    Leaving,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeState::Joining => write!(f, "JOINING"),
            NodeState::Member => write!(f, "MEMBER"),
            NodeState::Dead => write!(f, "DEAD"),
            NodeState::Leaving => write!(f, "LEAVING"),
        }
    }
}

/// Per-node flag bits, carried verbatim in NodeInfo messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags(u32);

impl NodeFlags {
    /// Node has left the membership at least once
    pub const BEEN_DOWN: u32 = 1;
    /// Entry is the quorum device pseudo-node
    pub const QUORUM_DEVICE: u32 = 8;
    /// Entry has been removed from the cluster
    pub const REMOVED: u32 = 16;
    /// Entry is the local node
    pub const LOCAL: u32 = 32;

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    pub fn contains(&self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn insert(&mut self, flag: u32) {
        self.0 |= flag;
    }

    pub fn remove(&mut self, flag: u32) {
        self.0 &= !flag;
    }
}

/// State of a single known node
#[derive(Debug, Clone)]
pub struct ClusterNode {
    /// Node identifier
    pub node_id: NodeId,
    /// Current state
    pub state: NodeState,
    /// Vote weight
    pub votes: u32,
    /// This node's belief about the total expected votes
    pub expected_votes: u32,
    /// Flag bits
    pub flags: NodeFlags,
    /// When the node was first registered
    pub join_time: chrono::DateTime<chrono::Utc>,
    /// Last liveness poll (quorum device only)
    pub last_hello: Option<Instant>,
}

impl ClusterNode {
    /// Create a zeroed node entry
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: NodeState::Joining,
            votes: 0,
            expected_votes: 0,
            flags: NodeFlags::default(),
            join_time: chrono::Utc::now(),
            last_hello: None,
        }
    }

    pub fn is_member(&self) -> bool {
        self.state == NodeState::Member
    }

    pub fn is_local(&self) -> bool {
        self.flags.contains(NodeFlags::LOCAL)
    }

    pub fn is_quorum_device(&self) -> bool {
        self.flags.contains(NodeFlags::QUORUM_DEVICE)
    }

    /// Record a liveness poll
    pub fn touch(&mut self) {
        self.last_hello = Some(Instant::now());
    }

    /// Whether the last liveness poll is older than `interval`
    pub fn hello_expired(&self, interval: Duration) -> bool {
        match self.last_hello {
            Some(last) => last.elapsed() > interval,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let mut flags = NodeFlags::default();
        flags.insert(NodeFlags::LOCAL);
        flags.insert(NodeFlags::BEEN_DOWN);
        assert!(flags.contains(NodeFlags::LOCAL));
        assert_eq!(flags.bits(), 33);

        flags.remove(NodeFlags::BEEN_DOWN);
        assert!(!flags.contains(NodeFlags::BEEN_DOWN));
        assert_eq!(NodeFlags::from_bits(flags.bits()), flags);
    }

    #[test]
    fn test_hello_expiry() {
        let mut node = ClusterNode::new(QUORUM_DEVICE_ID);
        assert!(node.hello_expired(Duration::from_secs(10)));

        node.touch();
        assert!(!node.hello_expired(Duration::from_secs(10)));
    }
}
