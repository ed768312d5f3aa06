//! Membership Change Reactor
//!
//! Applies views delivered by the group transport to the registry and
//! drives recalculation.

use serde::{Deserialize, Serialize};

use crate::state::{NodeFlags, NodeId, NodeState, QUORUM_DEVICE_ID};

use super::{QuorumEngine, RingId, TimerKind};

/// Kind of configuration change delivered by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigurationKind {
    /// Stable view
    Regular,
    /// Intermediate view while the ring reforms
    Transitional,
}

/// A membership view change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChange {
    pub kind: ConfigurationKind,
    /// Full member list of the new view
    pub members: Vec<NodeId>,
    /// Nodes that departed
    pub left: Vec<NodeId>,
    /// Nodes that joined
    pub joined: Vec<NodeId>,
    pub ring_id: RingId,
}

impl QuorumEngine {
    /// Apply a membership view change
    pub fn on_config_change(&mut self, change: &ConfigChange) {
        tracing::debug!(
            "{:?} configuration change on ring {}: {} members, {} left, {} joined",
            change.kind,
            change.ring_id,
            change.members.len(),
            change.left.len(),
            change.joined.len()
        );

        if change.members.len() > 1 {
            self.first_trans = false;
        }

        let mut leaving = false;
        for &node_id in &change.left {
            if let Some(node) = self.registry.find_mut(node_id) {
                if node.state == NodeState::Leaving {
                    leaving = true;
                }
                node.state = NodeState::Dead;
                node.flags.insert(NodeFlags::BEEN_DOWN);
            }
        }

        if self.policy.last_man_standing {
            let member_count = change.members.len() as u32;
            let shrunk_but_sufficient = member_count >= self.quorum && !change.left.is_empty();
            let holds_tie = member_count <= self.quorum
                && self.policy.auto_tie_breaker
                && self.holds_lowest_node();
            if shrunk_but_sufficient || holds_tie {
                let window = self.policy.last_man_standing_window;
                tracing::debug!("Arming last man standing timer for {:?}", window);
                self.arm_timer(TimerKind::LastManStanding, window);
            }
        }

        if !change.members.is_empty() {
            self.quorum_members = change.members.clone();
            if self.registry.quorum_device().is_some() {
                self.quorum_members.push(QUORUM_DEVICE_ID);
            }
        }

        if !change.left.is_empty() {
            self.recalculate(leaving, leaving);
        }

        // Announce after recalculating so our own echo carries current votes
        if !change.members.is_empty() {
            self.send_nodeinfo();
        }

        self.ring_id = change.ring_id;

        if change.kind == ConfigurationKind::Regular {
            self.notify_host();
        }
    }

    pub(super) fn on_last_man_standing_timer(&mut self) {
        if self.quorate {
            tracing::info!("Last man standing window expired, recalculating expected votes");
            self.recalculate(true, true);
        }
    }
}
