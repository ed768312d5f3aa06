//! Quorum Calculator
//!
//! Maps registry state and policy flags to a quorum threshold. The
//! arithmetic follows the OpenVMS cluster rule: quorum is a strict majority
//! of the larger of the highest expected votes and the votes present.

use crate::error::{Error, Result};
use crate::state::NodeRegistry;

use super::QuorumPolicy;

/// Outcome of a quorum calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuorumCalculation {
    /// Votes required to be quorate
    pub threshold: u32,
    /// Votes of members plus a live quorum device
    pub total_votes: u32,
    /// Highest expected votes among members (or the forced value)
    pub highest_expected: u32,
    /// Real nodes in `Member` state
    pub active_nodes: u32,
}

/// Strict majority of `votes`
pub fn majority(votes: u32) -> u32 {
    votes.saturating_add(2) / 2
}

/// Compute the quorum threshold
///
/// `previous` is the last threshold; unless `allow_decrease` is set the result
/// never drops below it. `forced_expected` replaces every member's expected
/// votes in the computation.
pub fn calculate_quorum(
    registry: &NodeRegistry,
    policy: &QuorumPolicy,
    previous: u32,
    allow_decrease: bool,
    forced_expected: Option<u32>,
) -> QuorumCalculation {
    let mut total_votes = 0u32;
    let mut highest_expected = 0u32;
    let mut active_nodes = 0u32;

    for node in registry.members() {
        tracing::debug!(
            "node {:x} state={}, votes={}, expected={}",
            node.node_id,
            node.state,
            node.votes,
            node.expected_votes
        );
        if node.is_member() {
            highest_expected = highest_expected.max(node.expected_votes);
            total_votes = total_votes.saturating_add(node.votes);
            active_nodes += 1;
        }
    }

    if let Some(device) = registry.quorum_device().filter(|d| d.is_member()) {
        total_votes = total_votes.saturating_add(device.votes);
    }

    if let Some(expected) = forced_expected {
        highest_expected = expected;
    }

    let mut threshold = majority(highest_expected).max(majority(total_votes));

    // Quorum only goes down when explicitly allowed
    if !allow_decrease {
        threshold = threshold.max(previous);
    }

    // Either of two nodes may carry on alone; fencing settles split brain
    if policy.two_node && active_nodes <= 2 {
        threshold = 1;
    }

    QuorumCalculation {
        threshold,
        total_votes,
        highest_expected,
        active_nodes,
    }
}

/// Reject configurations whose threshold leaves `[total/2, total]`
pub fn validate_threshold(calculation: &QuorumCalculation) -> Result<()> {
    let total = calculation.total_votes;
    if calculation.threshold < total / 2 || calculation.threshold > total {
        return Err(Error::InvalidParameter(format!(
            "quorum {} would be outside [{}, {}]",
            calculation.threshold,
            total / 2,
            total
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{NodeId, NodeState};

    fn registry(nodes: &[(NodeId, u32, u32)]) -> NodeRegistry {
        let mut registry = NodeRegistry::new(nodes[0].0);
        for &(id, votes, expected) in nodes {
            let node = registry.allocate(id).unwrap();
            node.state = NodeState::Member;
            node.votes = votes;
            node.expected_votes = expected;
        }
        registry
    }

    #[test]
    fn test_majority() {
        assert_eq!(majority(0), 1);
        assert_eq!(majority(1), 1);
        assert_eq!(majority(2), 2);
        assert_eq!(majority(3), 2);
        assert_eq!(majority(4), 3);
        assert_eq!(majority(u32::MAX), u32::MAX / 2);
    }

    #[test]
    fn test_threshold_is_max_of_both_majorities() {
        let policy = QuorumPolicy::default();
        let cases: &[(&[(NodeId, u32, u32)], u32)] = &[
            (&[(1, 1, 1)], 1),
            (&[(1, 1, 3), (2, 1, 3), (3, 1, 3)], 2),
            (&[(1, 1, 5), (2, 1, 5)], 3),
            (&[(1, 3, 2), (2, 3, 2)], 4),
            (&[(1, 1, 4), (2, 1, 6), (3, 2, 2)], 4),
        ];

        for (nodes, expected) in cases {
            let registry = registry(nodes);
            let calc = calculate_quorum(&registry, &policy, 0, false, None);
            let highest = nodes.iter().map(|n| n.2).max().unwrap();
            let total: u32 = nodes.iter().map(|n| n.1).sum();
            assert_eq!(calc.threshold, majority(highest).max(majority(total)));
            assert_eq!(calc.threshold, *expected, "nodes {:?}", nodes);
            assert_eq!(calc.total_votes, total);
            assert_eq!(calc.highest_expected, highest);
        }
    }

    #[test]
    fn test_dead_nodes_do_not_count() {
        let mut registry = registry(&[(1, 1, 3), (2, 1, 3), (3, 1, 9)]);
        registry.find_mut(3).unwrap().state = NodeState::Dead;

        let calc = calculate_quorum(&registry, &QuorumPolicy::default(), 0, false, None);
        assert_eq!(calc.total_votes, 2);
        assert_eq!(calc.highest_expected, 3);
        assert_eq!(calc.active_nodes, 2);
    }

    #[test]
    fn test_threshold_is_sticky_unless_decrease_allowed() {
        let registry = registry(&[(1, 1, 3), (2, 1, 3), (3, 1, 3)]);
        let policy = QuorumPolicy::default();

        let sticky = calculate_quorum(&registry, &policy, 5, false, None);
        assert_eq!(sticky.threshold, 5);

        let lowered = calculate_quorum(&registry, &policy, 5, true, None);
        assert_eq!(lowered.threshold, 2);
    }

    #[test]
    fn test_forced_expected_overrides_members() {
        let registry = registry(&[(1, 1, 10), (2, 1, 10)]);
        let calc = calculate_quorum(&registry, &QuorumPolicy::default(), 0, true, Some(2));
        assert_eq!(calc.highest_expected, 2);
        assert_eq!(calc.threshold, 2);
    }

    #[test]
    fn test_two_node_override() {
        let policy = QuorumPolicy {
            two_node: true,
            ..QuorumPolicy::default()
        };

        let pair = registry(&[(1, 5, 10), (2, 5, 10)]);
        assert_eq!(calculate_quorum(&pair, &policy, 7, false, None).threshold, 1);

        let triple = registry(&[(1, 1, 3), (2, 1, 3), (3, 1, 3)]);
        assert_eq!(calculate_quorum(&triple, &policy, 0, false, None).threshold, 2);
    }

    #[test]
    fn test_quorum_device_votes_only_when_member() {
        let mut registry = registry(&[(1, 1, 3), (2, 1, 3)]);
        registry.insert_quorum_device(1).unwrap();

        let policy = QuorumPolicy::default();
        assert_eq!(calculate_quorum(&registry, &policy, 0, false, None).total_votes, 2);

        registry.quorum_device_mut().unwrap().state = NodeState::Member;
        let calc = calculate_quorum(&registry, &policy, 0, false, None);
        assert_eq!(calc.total_votes, 3);
        assert_eq!(calc.active_nodes, 2);
    }

    #[test]
    fn test_validate_threshold() {
        let ok = QuorumCalculation {
            threshold: 2,
            total_votes: 3,
            highest_expected: 3,
            active_nodes: 3,
        };
        assert!(validate_threshold(&ok).is_ok());

        let unreachable = QuorumCalculation { threshold: 4, ..ok };
        assert!(matches!(
            validate_threshold(&unreachable),
            Err(Error::InvalidParameter(_))
        ));

        let too_low = QuorumCalculation {
            threshold: 1,
            total_votes: 4,
            ..ok
        };
        assert!(validate_threshold(&too_low).is_err());
    }
}
