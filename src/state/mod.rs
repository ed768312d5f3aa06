//! State Management Module
//!
//! Node registry and per-node vote state.

mod node;
mod registry;

pub use node::{ClusterNode, NodeFlags, NodeId, NodeState, LOCAL_NODE_ID, QUORUM_DEVICE_ID};
pub use registry::{NodeRegistry, MAX_NODES};
