//! Inter-Node Reconfiguration Protocol
//!
//! Handlers for NodeInfo and Reconfigure messages delivered by the group
//! transport, plus the senders for this node's own announcements.

use crate::error::{Error, Result};
use crate::protocol::exec::{PROTOCOL_MAJOR, PROTOCOL_MINOR, PROTOCOL_PATCH};
use crate::protocol::{ExecMessage, NodeInfo, ReconfigParam};
use crate::state::{ClusterNode, NodeFlags, NodeId, NodeState, QUORUM_DEVICE_ID};

use super::{QuorumEngine, TimerKind};

/// Flags that only make sense on the node that set them
const LOCAL_ONLY_FLAGS: u32 = NodeFlags::LOCAL | NodeFlags::QUORUM_DEVICE;

impl QuorumEngine {
    /// Decode a raw exec frame from `from` and apply it
    pub fn deliver(&mut self, from: NodeId, bytes: &[u8]) -> Result<()> {
        let message = ExecMessage::decode(bytes)?;
        self.handle_exec(from, message);
        Ok(())
    }

    /// Apply an exec message delivered by the group transport
    pub fn handle_exec(&mut self, from: NodeId, message: ExecMessage) {
        tracing::debug!("Received {} from node {}", message.type_name(), from);
        match message {
            ExecMessage::NodeInfo(info) => self.handle_nodeinfo(from, info),
            ExecMessage::Reconfigure {
                param,
                node_id,
                value,
            } => self.handle_reconfigure(param, node_id, value),
        }
    }

    fn handle_nodeinfo(&mut self, from: NodeId, info: NodeInfo) {
        tracing::debug!(
            "nodeinfo from {}: votes={}, expected={}, wait_for_all_status={}, quorate={}, first_trans={}",
            from,
            info.votes,
            info.expected_votes,
            info.wait_for_all_status,
            info.quorate,
            info.first_trans
        );

        if info.major_version != PROTOCOL_MAJOR {
            tracing::warn!(
                "Node {} speaks quorum protocol {}.{}.{}, we speak {}.{}.{}",
                from,
                info.major_version,
                info.minor_version,
                info.patch_version,
                PROTOCOL_MAJOR,
                PROTOCOL_MINOR,
                PROTOCOL_PATCH
            );
        }

        if from == QUORUM_DEVICE_ID {
            // Sender has no id yet; nothing to keep
            let mut ephemeral = ClusterNode::new(from);
            Self::apply_nodeinfo(&mut ephemeral, &info);
            self.recalculate(false, false);
            return;
        }

        let is_new = self.registry.find(from).is_none();
        let node = match self.registry.allocate(from) {
            Ok(node) => node,
            Err(e) => {
                tracing::error!("Unable to allocate node {}: {}", from, e);
                return;
            }
        };

        let old_votes = node.votes;
        let old_expected = node.expected_votes;
        let old_state = node.state;
        Self::apply_nodeinfo(node, &info);
        let changed =
            old_votes != node.votes || old_expected != node.expected_votes || old_state != node.state;

        if self.policy.last_man_standing && info.votes > 1 {
            tracing::warn!(
                "Last Man Standing feature is supported only when all cluster nodes votes are set to 1. Disabling LMS."
            );
            self.policy.last_man_standing = false;
            self.disarm_timer(TimerKind::LastManStanding);
        }

        if is_new || info.first_trans || changed {
            self.recalculate(false, false);
        }

        // A peer that already got past the gate lets us skip it
        if self.waiting_for_all() && !info.wait_for_all_status && info.quorate {
            tracing::debug!("Node {} is already quorate, clearing wait for all", from);
            self.wait_for_all_pending = false;
        }

        if self.policy.two_node && self.registry.len() > 2 {
            tracing::warn!(
                "quorum.two_node was set but there are more than 2 nodes in the cluster. It will be ignored."
            );
            self.policy.two_node = false;
        }
    }

    fn apply_nodeinfo(node: &mut ClusterNode, info: &NodeInfo) {
        node.votes = info.votes;
        node.expected_votes = info.expected_votes;
        node.flags.remove(NodeFlags::BEEN_DOWN);
        node.state = NodeState::Member;
    }

    fn handle_reconfigure(&mut self, param: ReconfigParam, node_id: NodeId, value: u32) {
        tracing::debug!(
            "reconfigure {:?} for node {} value {}",
            param,
            node_id,
            value
        );

        if param != ReconfigParam::ExpectedVotes && node_id == QUORUM_DEVICE_ID {
            tracing::debug!("Ignoring {:?} for the quorum device id", param);
            return;
        }

        match param {
            ReconfigParam::ExpectedVotes => {
                for node in self.registry.members_mut().filter(|n| n.is_member()) {
                    if node.expected_votes > value {
                        node.expected_votes = value;
                    }
                }
                self.send_expected_votes_notification();
                self.recalculate(true, false);
            }
            ReconfigParam::NodeVotes => {
                let Some(node) = self.registry.find_mut(node_id) else {
                    tracing::debug!("Ignoring vote change for unknown node {}", node_id);
                    return;
                };
                node.votes = value;
                self.recalculate(true, false);
            }
            ReconfigParam::Leaving => {
                let Some(node) = self.registry.find_mut(node_id) else {
                    tracing::debug!("Ignoring leave notice for unknown node {}", node_id);
                    return;
                };
                match (value, node.state) {
                    (1, NodeState::Member) => node.state = NodeState::Leaving,
                    (0, NodeState::Leaving) => node.state = NodeState::Member,
                    _ => {}
                }
            }
        }
    }

    /// Broadcast this node's vote state
    pub(crate) fn send_nodeinfo(&mut self) {
        let local = self.registry.local();
        let info = NodeInfo {
            first_trans: self.first_trans,
            votes: local.votes,
            expected_votes: local.expected_votes,
            major_version: PROTOCOL_MAJOR,
            minor_version: PROTOCOL_MINOR,
            patch_version: PROTOCOL_PATCH,
            config_version: 0,
            flags: local.flags.bits() & !LOCAL_ONLY_FLAGS,
            wait_for_all_status: self.waiting_for_all(),
            quorate: self.quorate,
        };
        self.broadcast(ExecMessage::NodeInfo(info));
    }

    /// Broadcast a reconfigure for `node_id`
    pub(crate) fn send_reconfigure(&mut self, param: ReconfigParam, node_id: NodeId, value: u32) {
        self.broadcast(ExecMessage::Reconfigure {
            param,
            node_id,
            value,
        });
    }

    /// Announce that this node is about to leave the cluster
    ///
    /// Remaining members may then lower quorum when the node departs. If it
    /// has not departed once the leave timeout expires the announcement is
    /// rescinded.
    pub fn leave(&mut self) -> Result<()> {
        let local_id = self.registry.local_id();
        self.transport
            .broadcast(&ExecMessage::Reconfigure {
                param: ReconfigParam::Leaving,
                node_id: local_id,
                value: 1,
            })
            .map_err(|e| Error::Broadcast(format!("leave announcement: {}", e)))?;

        if let Some(timeout) = self.settings.leaving_timeout() {
            self.arm_timer(TimerKind::Leaving, timeout);
        }
        Ok(())
    }

    pub(super) fn on_leaving_timer(&mut self) {
        let local = self.registry.local_mut();
        if local.state == NodeState::Leaving {
            local.state = NodeState::Member;
            tracing::info!("Leave timed out, rescinding");
            let local_id = self.registry.local_id();
            self.send_reconfigure(ReconfigParam::Leaving, local_id, 0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuorumSettings;
    use crate::protocol::TRACK_CHANGES_ONLY;
    use crate::quorum::testing::{connect, drain, harness, member_info, settings, Cluster};

    #[test]
    fn test_identical_nodeinfo_is_idempotent() {
        let (mut engine, probe) = harness(1, settings(3));
        engine.start();
        let mut rx = connect(&mut engine, 7);
        engine.track_start(7, TRACK_CHANGES_ONLY, 1).unwrap();

        engine.handle_exec(2, member_info(1, 3));
        let first = drain(&mut rx).len();
        assert!(first > 0);

        engine.handle_exec(2, member_info(1, 3));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(engine.registry().len(), 2);
        assert!(engine.is_quorate());
        assert_eq!(probe.verdicts().last().map(|v| v.1), Some(true));
    }

    #[test]
    fn test_first_trans_forces_recalculation() {
        let (mut engine, _probe) = harness(1, settings(3));
        engine.start();
        let mut rx = connect(&mut engine, 7);
        engine.track_start(7, TRACK_CHANGES_ONLY, 1).unwrap();

        engine.handle_exec(2, member_info(1, 3));
        drain(&mut rx);

        let mut message = member_info(1, 3);
        if let ExecMessage::NodeInfo(info) = &mut message {
            info.first_trans = true;
        }
        engine.handle_exec(2, message);
        assert!(!drain(&mut rx).is_empty());
    }

    #[test]
    fn test_nodeinfo_marks_member_and_clears_been_down() {
        let (mut engine, _probe) = harness(1, settings(3));
        engine.start();
        engine.handle_exec(2, member_info(1, 3));
        {
            let node = engine.registry.find_mut(2).unwrap();
            node.state = NodeState::Dead;
            node.flags.insert(NodeFlags::BEEN_DOWN);
        }

        engine.handle_exec(2, member_info(1, 3));
        let node = engine.registry().find(2).unwrap();
        assert_eq!(node.state, NodeState::Member);
        assert!(!node.flags.contains(NodeFlags::BEEN_DOWN));
        assert!(!node.is_local());
    }

    #[test]
    fn test_local_flag_not_adopted_from_peer() {
        let (mut engine, _probe) = harness(1, settings(2));
        engine.start();
        let mut message = member_info(1, 2);
        if let ExecMessage::NodeInfo(info) = &mut message {
            info.flags = NodeFlags::LOCAL;
        }
        engine.handle_exec(2, message);
        assert!(!engine.registry().find(2).unwrap().is_local());
        assert!(engine.registry().local().is_local());
    }

    #[test]
    fn test_peer_flags_are_not_copied() {
        let (mut engine, _probe) = harness(1, settings(2));
        engine.start();
        let mut message = member_info(1, 2);
        if let ExecMessage::NodeInfo(info) = &mut message {
            info.flags = NodeFlags::REMOVED | NodeFlags::BEEN_DOWN;
        }
        engine.handle_exec(2, message);

        let node = engine.registry().find(2).unwrap();
        assert!(!node.flags.contains(NodeFlags::REMOVED));
        assert!(!node.flags.contains(NodeFlags::BEEN_DOWN));
        assert_eq!(node.state, NodeState::Member);
    }

    #[test]
    fn test_reconfigure_ignores_quorum_device_id() {
        let (mut engine, _probe) = harness(1, settings(3));
        engine.start();
        engine.quorum_device_register("arbiter", 1).unwrap();
        engine.quorum_device_poll(true).unwrap();
        assert!(engine.is_quorate());

        engine.handle_exec(
            2,
            ExecMessage::Reconfigure {
                param: ReconfigParam::NodeVotes,
                node_id: QUORUM_DEVICE_ID,
                value: 3,
            },
        );
        engine.handle_exec(
            2,
            ExecMessage::Reconfigure {
                param: ReconfigParam::Leaving,
                node_id: QUORUM_DEVICE_ID,
                value: 1,
            },
        );

        let device = engine.registry().quorum_device().unwrap();
        assert_eq!(device.votes, 1);
        assert_eq!(device.state, NodeState::Member);
        assert_eq!(engine.quorum(), 2);
    }

    #[test]
    fn test_bootstrap_sender_is_not_stored() {
        let (mut engine, _probe) = harness(1, settings(2));
        engine.start();
        engine.handle_exec(QUORUM_DEVICE_ID, member_info(1, 2));
        assert!(engine.registry().find(QUORUM_DEVICE_ID).is_none());
        assert_eq!(engine.registry().len(), 1);
    }

    #[test]
    fn test_deliver_normalises_foreign_byte_order() {
        let (mut engine, _probe) = harness(1, settings(3));
        engine.start();

        // Big-endian NodeInfo: votes=2, expected=3
        let mut frame = vec![1u8, 0, 0, 0];
        for field in [0u32, 2, 3, PROTOCOL_MAJOR, PROTOCOL_MINOR, PROTOCOL_PATCH, 0, 0, 0, 0] {
            frame.extend_from_slice(&field.to_be_bytes());
        }
        engine.deliver(2, &frame).unwrap();

        let node = engine.registry().find(2).unwrap();
        assert_eq!(node.votes, 2);
        assert_eq!(node.expected_votes, 3);
        assert!(engine.is_quorate());
    }

    #[test]
    fn test_unknown_message_id_is_surfaced() {
        let (mut engine, _probe) = harness(1, settings(3));
        engine.start();
        let mut frame = member_info(1, 3).encode();
        frame[1] = 42;
        assert!(matches!(
            engine.deliver(2, &frame),
            Err(Error::UnknownMessage(42))
        ));
        assert_eq!(engine.registry().len(), 1);
    }

    #[test]
    fn test_multi_vote_peer_disables_last_man_standing() {
        let settings = QuorumSettings {
            expected_votes: 3,
            last_man_standing: true,
            ..QuorumSettings::default()
        };
        let (mut engine, _probe) = harness(1, settings);
        engine.start();
        assert!(engine.policy().last_man_standing);

        engine.handle_exec(2, member_info(2, 3));
        assert!(!engine.policy().last_man_standing);
    }

    #[test]
    fn test_quorate_peer_clears_wait_for_all() {
        let settings = QuorumSettings {
            expected_votes: 5,
            wait_for_all: true,
            ..QuorumSettings::default()
        };
        let (mut engine, _probe) = harness(1, settings);
        engine.start();
        assert!(engine.waiting_for_all());

        let mut message = member_info(1, 5);
        if let ExecMessage::NodeInfo(info) = &mut message {
            info.quorate = true;
        }
        engine.handle_exec(2, message);
        assert!(!engine.waiting_for_all());
    }

    #[test]
    fn test_two_node_disabled_with_third_node() {
        let settings = QuorumSettings {
            expected_votes: 2,
            two_node: true,
            ..QuorumSettings::default()
        };
        let (mut engine, _probe) = harness(1, settings);
        engine.start();
        engine.handle_exec(2, member_info(1, 2));
        assert!(engine.policy().two_node);
        assert_eq!(engine.quorum(), 1);

        engine.handle_exec(3, member_info(1, 2));
        assert!(!engine.policy().two_node);
    }

    #[test]
    fn test_expected_votes_reconfigure_lowers_members() {
        let mut cluster = Cluster::new(&[1, 2, 3], settings(5));
        assert_eq!(cluster.engine(1).quorum(), 3);

        cluster.engine_mut(1).send_reconfigure(ReconfigParam::ExpectedVotes, 1, 3);
        cluster.pump(&[1, 2, 3]);
        for id in [1, 2, 3] {
            let engine = cluster.engine(id);
            assert!(engine.registry().active_members().all(|n| n.expected_votes == 3));
            assert_eq!(engine.quorum(), 2);
        }
    }

    #[test]
    fn test_node_votes_reconfigure() {
        let mut cluster = Cluster::new(&[1, 2, 3], settings(3));
        cluster.engine_mut(2).send_reconfigure(ReconfigParam::NodeVotes, 3, 3);
        cluster.pump(&[1, 2, 3]);
        assert_eq!(cluster.engine(1).registry().find(3).unwrap().votes, 3);

        // Unknown target is ignored
        cluster.engine_mut(2).send_reconfigure(ReconfigParam::NodeVotes, 99, 3);
        cluster.pump(&[1, 2, 3]);
        assert!(cluster.engine(1).registry().find(99).is_none());
    }

    #[test]
    fn test_leave_rescinded_after_timeout() {
        let mut cluster = Cluster::new(&[1, 2, 3], settings(3));
        cluster.engine_mut(3).leave().unwrap();
        cluster.pump(&[1, 2, 3]);
        assert_eq!(cluster.engine(3).registry().local().state, NodeState::Leaving);

        let probe = cluster.probes[&3].clone();
        let handle = probe.last_timer(TimerKind::Leaving).unwrap();
        assert_eq!(
            probe.scheduled().last().map(|s| s.2),
            Some(std::time::Duration::from_millis(10_000))
        );

        cluster.engine_mut(3).on_timer(TimerKind::Leaving, handle);
        assert_eq!(cluster.engine(3).registry().local().state, NodeState::Member);
        cluster.pump(&[1, 2, 3]);
        assert_eq!(
            cluster.engine(1).registry().find(3).unwrap().state,
            NodeState::Member
        );
    }

    #[test]
    fn test_leave_fails_when_broadcast_fails() {
        let (mut engine, probe) = harness(1, settings(1));
        engine.start();
        probe.fail_broadcasts(true);
        assert!(matches!(engine.leave(), Err(Error::Broadcast(_))));
        assert!(probe.last_timer(TimerKind::Leaving).is_none());
    }
}
