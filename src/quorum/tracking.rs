//! Tracking & Notification Dispatcher
//!
//! Per-connection subscriptions to quorum and expected-votes changes.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::protocol::{
    NodeEntry, Notification, QuorumNotification, TRACK_CHANGES, TRACK_CHANGES_ONLY, TRACK_CURRENT,
};

use super::QuorumEngine;

/// Identifier of a local client connection
pub type ConnectionId = u64;

/// Notification subscription of one connection
#[derive(Debug)]
pub struct Tracker {
    /// Flags passed to TrackStart
    pub flags: u8,
    /// Correlation token echoed in every notification
    pub context: u64,
    /// Receives change notifications
    pub enabled: bool,
    sink: mpsc::UnboundedSender<Notification>,
}

impl Tracker {
    fn send(&self, notification: Notification) {
        // A closed sink means the connection is going away
        let _ = self.sink.send(notification);
    }
}

/// Trackers of all open connections
#[derive(Debug, Default)]
pub struct TrackerRegistry {
    trackers: HashMap<ConnectionId, Tracker>,
}

impl TrackerRegistry {
    /// Attach a sink for `conn`; it stays disabled until tracking starts
    pub fn connect(&mut self, conn: ConnectionId, sink: mpsc::UnboundedSender<Notification>) {
        self.trackers.insert(
            conn,
            Tracker {
                flags: 0,
                context: 0,
                enabled: false,
                sink,
            },
        );
    }

    pub fn disconnect(&mut self, conn: ConnectionId) -> Option<Tracker> {
        self.trackers.remove(&conn)
    }

    /// Enable change notifications for `conn`
    pub fn start(&mut self, conn: ConnectionId, flags: u8, context: u64) -> Result<()> {
        let tracker = self
            .trackers
            .get_mut(&conn)
            .ok_or_else(|| Error::NotFound(format!("connection {}", conn)))?;
        tracker.flags = flags;
        tracker.context = context;
        tracker.enabled = true;
        Ok(())
    }

    /// Disable change notifications for `conn`
    pub fn stop(&mut self, conn: ConnectionId) -> Result<()> {
        match self.trackers.get_mut(&conn) {
            Some(tracker) if tracker.enabled => {
                tracker.enabled = false;
                tracker.flags = 0;
                Ok(())
            }
            _ => Err(Error::NotFound(format!(
                "connection {} is not tracking",
                conn
            ))),
        }
    }

    pub fn get(&self, conn: ConnectionId) -> Option<&Tracker> {
        self.trackers.get(&conn)
    }

    /// Enabled trackers
    pub fn enabled(&self) -> impl Iterator<Item = &Tracker> {
        self.trackers.values().filter(|t| t.enabled)
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }
}

impl QuorumEngine {
    /// A local client connected
    pub fn connection_opened(
        &mut self,
        conn: ConnectionId,
        sink: mpsc::UnboundedSender<Notification>,
    ) {
        tracing::debug!("Connection {} opened", conn);
        self.trackers.connect(conn, sink);
    }

    /// A local client disconnected; its tracker goes with it
    pub fn connection_closed(&mut self, conn: ConnectionId) {
        tracing::debug!("Connection {} closed", conn);
        self.trackers.disconnect(conn);
    }

    /// Start tracking on `conn` according to `flags`
    pub fn track_start(&mut self, conn: ConnectionId, flags: u8, context: u64) -> Result<()> {
        let tracker = self
            .trackers
            .get(conn)
            .ok_or_else(|| Error::NotFound(format!("connection {}", conn)))?;

        if flags & (TRACK_CURRENT | TRACK_CHANGES) != 0 {
            tracker.send(Notification::Quorum(self.quorum_notification(context)));
        }
        if flags & (TRACK_CHANGES | TRACK_CHANGES_ONLY) != 0 {
            self.trackers.start(conn, flags, context)?;
        }
        Ok(())
    }

    /// Stop tracking on `conn`
    pub fn track_stop(&mut self, conn: ConnectionId) -> Result<()> {
        self.trackers.stop(conn)
    }

    /// Current status for one subscriber
    fn quorum_notification(&self, context: u64) -> QuorumNotification {
        QuorumNotification {
            context,
            quorate: self.quorate,
            ring_id: self.ring_id,
            nodes: self
                .registry
                .all()
                .map(|node| NodeEntry {
                    node_id: node.node_id,
                    state: node.state,
                    quorum_device: node.is_quorum_device(),
                })
                .collect(),
        }
    }

    /// Send the full quorum status to every enabled tracker
    pub(crate) fn send_quorum_notification(&mut self) {
        for tracker in self.trackers.enabled() {
            tracker.send(Notification::Quorum(self.quorum_notification(tracker.context)));
        }
    }

    /// Tell every enabled tracker about this node's expected votes
    pub(crate) fn send_expected_votes_notification(&mut self) {
        let expected_votes = self.registry.local().expected_votes;
        for tracker in self.trackers.enabled() {
            tracker.send(Notification::ExpectedVotes {
                context: tracker.context,
                expected_votes,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quorum::testing::{connect, drain, harness, member_info, settings};
    use crate::state::NodeState;

    #[test]
    fn test_track_current_sends_once() {
        let (mut engine, _probe) = harness(1, settings(3));
        engine.start();
        let mut rx = connect(&mut engine, 1);

        engine.track_start(1, TRACK_CURRENT, 99).unwrap();
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            Notification::Quorum(n) => {
                assert_eq!(n.context, 99);
                assert!(!n.quorate);
                assert_eq!(n.nodes.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }

        // Not subscribed to changes
        engine.handle_exec(2, member_info(1, 3));
        assert!(drain(&mut rx).is_empty());
        assert!(matches!(engine.track_stop(1), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_track_changes_sends_status_then_changes() {
        let (mut engine, _probe) = harness(1, settings(3));
        engine.start();
        let mut rx = connect(&mut engine, 1);

        engine.track_start(1, TRACK_CHANGES, 5).unwrap();
        assert_eq!(drain(&mut rx).len(), 1);

        engine.handle_exec(2, member_info(1, 3));
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert!(matches!(&sent[0], Notification::Quorum(n) if n.quorate && n.context == 5));

        engine.track_stop(1).unwrap();
        engine.handle_exec(3, member_info(1, 3));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_expected_votes_notification_on_raise() {
        let (mut engine, _probe) = harness(1, settings(2));
        engine.start();
        let mut rx = connect(&mut engine, 1);
        engine.track_start(1, TRACK_CHANGES_ONLY, 3).unwrap();
        assert!(drain(&mut rx).is_empty());

        engine.handle_exec(2, member_info(2, 2));
        let sent = drain(&mut rx);
        assert!(sent.contains(&Notification::ExpectedVotes {
            context: 3,
            expected_votes: 3
        }));
    }

    #[test]
    fn test_notification_lists_tombstones_and_device() {
        let (mut engine, _probe) = harness(2, settings(3));
        engine.start();
        engine.handle_exec(1, member_info(1, 3));
        engine.on_config_change(&crate::quorum::testing::view(&[2], &[1], &[], 2));
        engine.quorum_device_register("arbiter", 1).unwrap();

        let mut rx = connect(&mut engine, 1);
        engine.track_start(1, TRACK_CURRENT, 0).unwrap();
        let Notification::Quorum(n) = drain(&mut rx).remove(0) else {
            panic!("expected quorum notification");
        };
        let summary: Vec<_> = n
            .nodes
            .iter()
            .map(|e| (e.node_id, e.state, e.quorum_device))
            .collect();
        assert_eq!(
            summary,
            vec![
                (0, NodeState::Dead, true),
                (1, NodeState::Dead, false),
                (2, NodeState::Member, false),
            ]
        );
        assert_eq!(n.ring_id.seq, 2);
    }

    #[test]
    fn test_disconnect_drops_tracker() {
        let (mut engine, _probe) = harness(1, settings(1));
        engine.start();
        let _rx = connect(&mut engine, 4);
        engine.track_start(4, TRACK_CHANGES_ONLY, 0).unwrap();
        assert_eq!(engine.trackers.len(), 1);

        engine.connection_closed(4);
        assert!(engine.trackers.is_empty());
        assert!(matches!(
            engine.track_start(4, TRACK_CHANGES, 0),
            Err(Error::NotFound(_))
        ));
    }
}
