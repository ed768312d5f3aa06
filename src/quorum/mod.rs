//! Quorum Engine
//!
//! Vote-weighted quorum over a membership view delivered by the group
//! transport. The engine is a single-owner state machine: membership
//! changes, exec messages, client requests and timer firings are applied
//! one at a time and each runs to completion.
//!
//! External collaborators are reached through three traits:
//! [`GroupTransport`] (atomic broadcast), [`QuorumHost`] (the process that
//! gates destructive work on the verdict) and [`TimerService`].

mod calculator;
mod device;
mod policy;
mod reactor;
mod reconfig;
mod requests;
mod tracking;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::config::QuorumSettings;
use crate::error::Result;
use crate::protocol::ExecMessage;
use crate::state::{NodeId, NodeRegistry};

pub use calculator::{calculate_quorum, majority, validate_threshold, QuorumCalculation};
pub use policy::QuorumPolicy;
pub use reactor::{ConfigChange, ConfigurationKind};
pub use tracking::{ConnectionId, Tracker, TrackerRegistry};

/// Opaque identifier of a stable membership view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RingId {
    /// Representative node of the ring
    pub rep: NodeId,
    /// Ring sequence number
    pub seq: u64,
}

impl std::fmt::Display for RingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.rep, self.seq)
    }
}

/// Atomic broadcast to every group member, including the sender
pub trait GroupTransport: Send {
    fn broadcast(&mut self, message: &ExecMessage) -> Result<()>;
}

/// Receiver of quorum verdicts (the process gating cluster operations)
pub trait QuorumHost: Send {
    fn quorum_changed(&mut self, members: &[NodeId], quorate: bool, ring_id: RingId);
}

/// Timers driven by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Delayed recalculation after a shrinking view
    LastManStanding,
    /// Quorum device liveness check
    QuorumDevice,
    /// Rescind an unfinished voluntary leave
    Leaving,
}

/// Handle of a scheduled single-shot timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

/// Single-shot timer scheduling
pub trait TimerService: Send {
    fn schedule(&mut self, kind: TimerKind, after: Duration) -> TimerHandle;
    fn cancel(&mut self, handle: TimerHandle);
}

/// Currently armed timer per kind
#[derive(Debug, Default)]
struct TimerSlots {
    last_man_standing: Option<TimerHandle>,
    quorum_device: Option<TimerHandle>,
    leaving: Option<TimerHandle>,
}

impl TimerSlots {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<TimerHandle> {
        match kind {
            TimerKind::LastManStanding => &mut self.last_man_standing,
            TimerKind::QuorumDevice => &mut self.quorum_device,
            TimerKind::Leaving => &mut self.leaving,
        }
    }
}

/// The quorum engine
pub struct QuorumEngine {
    /// Known nodes
    registry: NodeRegistry,
    /// Policy flags
    policy: QuorumPolicy,
    /// Current configuration keys
    settings: QuorumSettings,
    /// Last computed quorum threshold
    quorum: u32,
    /// Current verdict
    quorate: bool,
    /// Wait-for-all gate still armed
    wait_for_all_pending: bool,
    /// Lowest node id seen when the wait-for-all gate was last satisfied
    lowest_node_id: Option<NodeId>,
    /// No multi-node view has been seen yet
    first_trans: bool,
    /// Member list of the last view (plus the quorum device)
    quorum_members: Vec<NodeId>,
    /// Ring of the last view
    ring_id: RingId,
    /// Registered quorum device name
    device_name: Option<String>,
    /// Armed timers
    timers: TimerSlots,
    /// Notification subscribers
    trackers: TrackerRegistry,
    transport: Box<dyn GroupTransport>,
    host: Box<dyn QuorumHost>,
    scheduler: Box<dyn TimerService>,
}

impl QuorumEngine {
    /// Create an engine for `local_id`; call [`QuorumEngine::start`] before use
    pub fn new(
        local_id: NodeId,
        settings: QuorumSettings,
        transport: Box<dyn GroupTransport>,
        host: Box<dyn QuorumHost>,
        scheduler: Box<dyn TimerService>,
    ) -> Self {
        let policy = QuorumPolicy::from_settings(&settings);
        let wait_for_all_pending = policy.wait_for_all;

        let mut engine = Self {
            registry: NodeRegistry::new(local_id),
            policy,
            settings,
            quorum: 0,
            quorate: false,
            wait_for_all_pending,
            lowest_node_id: None,
            first_trans: true,
            quorum_members: Vec::new(),
            ring_id: RingId::default(),
            device_name: None,
            timers: TimerSlots::default(),
            trackers: TrackerRegistry::default(),
            transport,
            host,
            scheduler,
        };
        engine.apply_settings();
        engine
    }

    /// Compute the initial verdict and announce this node to the group
    pub fn start(&mut self) {
        tracing::info!(
            "Starting quorum engine for node {} (votes: {}, expected: {}, {})",
            self.registry.local_id(),
            self.registry.local().votes,
            self.registry.local().expected_votes,
            self.policy
        );
        self.registry.local_mut().join_time = chrono::Utc::now();
        self.recalculate(false, false);
        self.send_nodeinfo();
    }

    /// Get this node's ID
    pub fn node_id(&self) -> NodeId {
        self.registry.local_id()
    }

    /// Current verdict
    pub fn is_quorate(&self) -> bool {
        self.quorate
    }

    /// Last computed quorum threshold
    pub fn quorum(&self) -> u32 {
        self.quorum
    }

    /// Node registry (read-only)
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Active policy flags
    pub fn policy(&self) -> &QuorumPolicy {
        &self.policy
    }

    /// Ring of the last membership view
    pub fn ring_id(&self) -> RingId {
        self.ring_id
    }

    /// Member list reported with the last verdict
    pub fn quorum_members(&self) -> &[NodeId] {
        &self.quorum_members
    }

    /// Whether the wait-for-all gate is still armed
    pub fn waiting_for_all(&self) -> bool {
        self.policy.wait_for_all && self.wait_for_all_pending
    }

    /// Copy the reloadable configuration keys into the local node
    fn apply_settings(&mut self) {
        let local = self.registry.local_mut();
        local.expected_votes = self.settings.expected_votes;
        local.votes = self.settings.votes;
        self.policy.two_node = self.settings.two_node;

        if self.policy.two_node && self.registry.len() > 2 {
            tracing::warn!(
                "quorum.two_node was set but there are more than 2 nodes in the cluster. It will be ignored."
            );
            self.policy.two_node = false;
        }
    }

    /// Reload configuration keys after a configuration change
    pub fn reload_settings(&mut self, settings: QuorumSettings) {
        tracing::debug!("Reading configuration");

        let old_votes = self.registry.local().votes;
        let old_expected = self.registry.local().expected_votes;

        // Policy switches other than two_node are fixed at startup
        self.settings = QuorumSettings {
            wait_for_all: self.settings.wait_for_all,
            auto_tie_breaker: self.settings.auto_tie_breaker,
            last_man_standing: self.settings.last_man_standing,
            last_man_standing_window_ms: self.settings.last_man_standing_window_ms,
            ..settings
        };
        self.apply_settings();

        let local_id = self.registry.local_id();
        let local = self.registry.local();
        let (votes, expected) = (local.votes, local.expected_votes);
        if old_votes != votes {
            self.send_reconfigure(crate::protocol::ReconfigParam::NodeVotes, local_id, votes);
        }
        if old_expected != expected {
            self.send_reconfigure(crate::protocol::ReconfigParam::ExpectedVotes, local_id, expected);
        }
    }

    /// Dispatch a timer firing; stale handles are ignored
    pub fn on_timer(&mut self, kind: TimerKind, handle: TimerHandle) {
        let slot = self.timers.slot(kind);
        if *slot != Some(handle) {
            tracing::trace!("Ignoring stale {:?} timer {:?}", kind, handle);
            return;
        }
        *slot = None;

        match kind {
            TimerKind::LastManStanding => self.on_last_man_standing_timer(),
            TimerKind::QuorumDevice => self.on_quorum_device_timer(),
            TimerKind::Leaving => self.on_leaving_timer(),
        }
    }

    /// Cancel any armed timer of `kind`, then schedule a new one
    fn arm_timer(&mut self, kind: TimerKind, after: Duration) {
        self.disarm_timer(kind);
        let handle = self.scheduler.schedule(kind, after);
        *self.timers.slot(kind) = Some(handle);
    }

    fn disarm_timer(&mut self, kind: TimerKind) {
        if let Some(handle) = self.timers.slot(kind).take() {
            self.scheduler.cancel(handle);
        }
    }

    /// Broadcast an exec message; failures are logged and tolerated
    fn broadcast(&mut self, message: ExecMessage) {
        if let Err(e) = self.transport.broadcast(&message) {
            tracing::warn!("Failed to broadcast {}: {}", message.type_name(), e);
        }
    }

    /// Recalculate quorum, set the verdict and notify trackers
    pub(crate) fn recalculate(&mut self, allow_decrease: bool, by_member_count: bool) {
        let mut member_count = 0;
        let mut total_votes = 0u32;
        for node in self.registry.active_members() {
            member_count += 1;
            total_votes = total_votes.saturating_add(node.votes);
        }

        // Keep expected votes at the highest number of votes in the cluster
        tracing::debug!(
            "total_votes={}, expected_votes={}",
            total_votes,
            self.registry.local().expected_votes
        );
        if total_votes > self.registry.local().expected_votes {
            self.registry.local_mut().expected_votes = total_votes;
            self.send_expected_votes_notification();
        }

        let forced_expected = (by_member_count && member_count > 0).then_some(member_count);
        if let Some(expected) = forced_expected {
            for node in self.registry.members_mut().filter(|n| n.is_member()) {
                node.expected_votes = expected;
            }
        }

        let calculation = calculate_quorum(
            &self.registry,
            &self.policy,
            self.quorum,
            allow_decrease,
            forced_expected,
        );
        self.quorum = calculation.threshold;
        self.set_quorate(calculation.total_votes);

        self.send_quorum_notification();
    }

    fn notify_host(&mut self) {
        self.host
            .quorum_changed(&self.quorum_members, self.quorate, self.ring_id);
    }
}
