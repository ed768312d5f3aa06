//! Test harness: recording collaborators, a manual timer service and a
//! multi-node simulator that delivers broadcasts in one total order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::config::QuorumSettings;
use crate::error::{Error, Result};
use crate::protocol::{ExecMessage, NodeInfo, Notification};
use crate::protocol::exec::{PROTOCOL_MAJOR, PROTOCOL_MINOR, PROTOCOL_PATCH};
use crate::state::NodeId;

use super::{
    ConfigChange, ConfigurationKind, ConnectionId, GroupTransport, QuorumEngine, QuorumHost,
    RingId, TimerHandle, TimerKind, TimerService,
};

/// Host verdict as (members, quorate, ring)
pub type Verdict = (Vec<NodeId>, bool, RingId);

#[derive(Default)]
struct Recorded {
    sent: Vec<ExecMessage>,
    verdicts: Vec<Verdict>,
    scheduled: Vec<(TimerKind, TimerHandle, Duration)>,
    cancelled: Vec<TimerHandle>,
    next_handle: u64,
    fail_broadcast: bool,
}

/// Shared view of everything the engine's collaborators observed
#[derive(Clone, Default)]
pub struct Probe {
    inner: Arc<Mutex<Recorded>>,
}

impl Probe {
    /// Drain exec messages broadcast so far
    pub fn take_sent(&self) -> Vec<ExecMessage> {
        std::mem::take(&mut self.inner.lock().unwrap().sent)
    }

    pub fn verdicts(&self) -> Vec<Verdict> {
        self.inner.lock().unwrap().verdicts.clone()
    }

    pub fn scheduled(&self) -> Vec<(TimerKind, TimerHandle, Duration)> {
        self.inner.lock().unwrap().scheduled.clone()
    }

    pub fn cancelled(&self) -> Vec<TimerHandle> {
        self.inner.lock().unwrap().cancelled.clone()
    }

    /// Most recently scheduled handle of `kind`
    pub fn last_timer(&self, kind: TimerKind) -> Option<TimerHandle> {
        self.scheduled()
            .into_iter()
            .rev()
            .find(|(k, _, _)| *k == kind)
            .map(|(_, h, _)| h)
    }

    pub fn fail_broadcasts(&self, fail: bool) {
        self.inner.lock().unwrap().fail_broadcast = fail;
    }
}

struct RecordingTransport(Probe);

impl GroupTransport for RecordingTransport {
    fn broadcast(&mut self, message: &ExecMessage) -> Result<()> {
        let mut inner = self.0.inner.lock().unwrap();
        if inner.fail_broadcast {
            return Err(Error::Broadcast("transport unavailable".into()));
        }
        inner.sent.push(*message);
        Ok(())
    }
}

struct RecordingHost(Probe);

impl QuorumHost for RecordingHost {
    fn quorum_changed(&mut self, members: &[NodeId], quorate: bool, ring_id: RingId) {
        self.0
            .inner
            .lock()
            .unwrap()
            .verdicts
            .push((members.to_vec(), quorate, ring_id));
    }
}

struct ManualTimers(Probe);

impl TimerService for ManualTimers {
    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerHandle {
        let mut inner = self.0.inner.lock().unwrap();
        inner.next_handle += 1;
        let handle = TimerHandle(inner.next_handle);
        inner.scheduled.push((kind, handle, after));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.0.inner.lock().unwrap().cancelled.push(handle);
    }
}

/// Engine wired to recording collaborators
pub fn harness(local_id: NodeId, settings: QuorumSettings) -> (QuorumEngine, Probe) {
    let probe = Probe::default();
    let engine = QuorumEngine::new(
        local_id,
        settings,
        Box::new(RecordingTransport(probe.clone())),
        Box::new(RecordingHost(probe.clone())),
        Box::new(ManualTimers(probe.clone())),
    );
    (engine, probe)
}

/// Settings for a cluster of `expected` single-vote nodes
pub fn settings(expected: u32) -> QuorumSettings {
    QuorumSettings {
        expected_votes: expected,
        ..QuorumSettings::default()
    }
}

/// NodeInfo of a settled member
pub fn member_info(votes: u32, expected_votes: u32) -> ExecMessage {
    ExecMessage::NodeInfo(NodeInfo {
        first_trans: false,
        votes,
        expected_votes,
        major_version: PROTOCOL_MAJOR,
        minor_version: PROTOCOL_MINOR,
        patch_version: PROTOCOL_PATCH,
        config_version: 0,
        flags: 0,
        wait_for_all_status: false,
        quorate: false,
    })
}

/// Regular membership view
pub fn view(members: &[NodeId], left: &[NodeId], joined: &[NodeId], seq: u64) -> ConfigChange {
    ConfigChange {
        kind: ConfigurationKind::Regular,
        members: members.to_vec(),
        left: left.to_vec(),
        joined: joined.to_vec(),
        ring_id: RingId {
            rep: members.first().copied().unwrap_or(0),
            seq,
        },
    }
}

/// Connect a notification sink for `conn`
pub fn connect(
    engine: &mut QuorumEngine,
    conn: ConnectionId,
) -> mpsc::UnboundedReceiver<Notification> {
    let (tx, rx) = mpsc::unbounded_channel();
    engine.connection_opened(conn, tx);
    rx
}

/// Drain all pending notifications
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        out.push(notification);
    }
    out
}

/// Several engines sharing one simulated group transport
pub struct Cluster {
    pub engines: HashMap<NodeId, QuorumEngine>,
    pub probes: HashMap<NodeId, Probe>,
    /// Last view delivered to each engine
    views: HashMap<NodeId, Vec<NodeId>>,
    seq: u64,
}

impl Cluster {
    /// Start `ids` as single-vote nodes and form one view containing all of them
    pub fn new(ids: &[NodeId], settings: QuorumSettings) -> Self {
        let mut cluster = Self {
            engines: HashMap::new(),
            probes: HashMap::new(),
            views: HashMap::new(),
            seq: 0,
        };
        for &id in ids {
            let (mut engine, probe) = harness(id, settings.clone());
            engine.start();
            // Startup announcements go nowhere until a view forms
            probe.take_sent();
            cluster.engines.insert(id, engine);
            cluster.probes.insert(id, probe);
            cluster.views.insert(id, vec![id]);
        }
        cluster.form_view(ids);
        cluster
    }

    pub fn engine(&self, id: NodeId) -> &QuorumEngine {
        &self.engines[&id]
    }

    pub fn engine_mut(&mut self, id: NodeId) -> &mut QuorumEngine {
        self.engines.get_mut(&id).unwrap()
    }

    /// Deliver a new regular view to every engine in `members`
    pub fn form_view(&mut self, members: &[NodeId]) {
        self.seq += 1;
        let mut members = members.to_vec();
        members.sort_unstable();
        for &id in &members {
            // Diff against the last view this engine saw, so leaving nodes are reported
            let previous = self.views.insert(id, members.clone()).unwrap_or_default();
            let left: Vec<NodeId> = previous
                .iter()
                .copied()
                .filter(|p| !members.contains(p))
                .collect();
            let joined: Vec<NodeId> = members
                .iter()
                .copied()
                .filter(|m| !previous.contains(m))
                .collect();
            self.engines
                .get_mut(&id)
                .unwrap()
                .on_config_change(&view(&members, &left, &joined, self.seq));
        }
        self.pump(&members);
    }

    /// Deliver every pending broadcast from `members` to `members`, in order
    pub fn pump(&mut self, members: &[NodeId]) {
        loop {
            let mut pending = Vec::new();
            for &sender in members {
                for message in self.probes[&sender].take_sent() {
                    pending.push((sender, message));
                }
            }
            if pending.is_empty() {
                break;
            }
            for (sender, message) in pending {
                for &receiver in members {
                    self.engines
                        .get_mut(&receiver)
                        .unwrap()
                        .handle_exec(sender, message);
                }
            }
        }
    }
}
