//! Special Quorum Modes
//!
//! Two-node, wait-for-all, auto-tie-breaker and last-man-standing. Two-node
//! is applied by the calculator; the verdict itself is decided here.

use std::time::Duration;

use crate::config::QuorumSettings;
use crate::state::NodeId;

use super::QuorumEngine;

/// Policy flags, fixed between recalculations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuorumPolicy {
    /// Threshold forced to 1 while at most two nodes are members
    pub two_node: bool,
    /// Withhold quorum until all expected votes were seen once
    pub wait_for_all: bool,
    /// Resolve exact half splits towards the lowest node id
    pub auto_tie_breaker: bool,
    /// Recalculate after a shrinking view has settled
    pub last_man_standing: bool,
    /// Settling window for last man standing
    pub last_man_standing_window: Duration,
}

impl QuorumPolicy {
    pub fn from_settings(settings: &QuorumSettings) -> Self {
        Self {
            two_node: settings.two_node,
            // The tie breaker needs a full view to know the lowest node id
            wait_for_all: settings.wait_for_all || settings.auto_tie_breaker,
            auto_tie_breaker: settings.auto_tie_breaker,
            last_man_standing: settings.last_man_standing,
            last_man_standing_window: settings.last_man_standing_window(),
        }
    }
}

impl std::fmt::Display for QuorumPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "two_node={} wait_for_all={} auto_tie_breaker={} last_man_standing={}",
            self.two_node, self.wait_for_all, self.auto_tie_breaker, self.last_man_standing
        )
    }
}

impl QuorumEngine {
    /// Record the lowest member id once the whole cluster has been seen
    fn snapshot_lowest_node_id(&mut self) {
        self.lowest_node_id = self.registry.lowest_active_member_id();
        tracing::debug!(
            "lowest node id: {:?} us: {}",
            self.lowest_node_id,
            self.registry.local_id()
        );
    }

    /// Whether this partition holds the recorded lowest node id
    pub(crate) fn holds_lowest_node(&self) -> bool {
        self.lowest_node_id
            .map(|id| self.registry.is_active_member(id))
            .unwrap_or(false)
    }

    /// Lowest node id recorded for the tie breaker
    pub fn lowest_node_id(&self) -> Option<NodeId> {
        self.lowest_node_id
    }

    /// Decide the verdict for `total_votes` and report changes to the host
    pub(crate) fn set_quorate(&mut self, total_votes: u32) {
        let expected_votes = self.registry.local().expected_votes;

        let quorate = if self.waiting_for_all() && total_votes != expected_votes {
            tracing::info!(
                "Waiting for all cluster members. Current votes: {} expected_votes: {}",
                total_votes,
                expected_votes
            );
            false
        } else {
            if self.waiting_for_all() {
                self.wait_for_all_pending = false;
                self.snapshot_lowest_node_id();
            }

            let mut quorate = total_votes >= self.quorum;
            if self.policy.auto_tie_breaker
                && total_votes == expected_votes / 2
                && self.holds_lowest_node()
            {
                quorate = true;
            }

            // Losing quorum re-arms the gate
            if self.policy.wait_for_all {
                self.wait_for_all_pending = !quorate;
            }
            quorate
        };

        let changed = quorate != self.quorate;
        if changed {
            if quorate {
                tracing::info!("quorum regained, resuming activity");
            } else {
                tracing::info!("quorum lost, blocking activity");
            }
        }
        self.quorate = quorate;

        if changed {
            self.notify_host();
        }
    }
}
