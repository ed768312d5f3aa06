//! WolfQuorum - Vote-Weighted Cluster Quorum
//!
//! Decides, for each member of a process group, whether the local partition
//! holds a majority of the cluster's votes and may therefore perform
//! destructive cluster operations.
//!
//! # Architecture
//!
//! The [`quorum::QuorumEngine`] is a single-owner state machine fed by
//! membership views and totally ordered broadcasts from a group transport.
//! Every replica applies the same messages in the same order, so their node
//! registries converge without further coordination.
//!
//! # Features
//!
//! - Quorum as a strict majority of the larger of expected and present votes
//! - Two-node, wait-for-all, auto-tie-breaker and last-man-standing modes
//! - External quorum device with liveness polling
//! - Replicated vote, expected-vote and leave reconfiguration
//! - Local IPC with change tracking for clients

pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod quorum;
pub mod service;
pub mod state;

pub use config::WolfQuorumConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{QuorumSettings, WolfQuorumConfig};
    pub use crate::error::{Error, Result};
    pub use crate::protocol::{ExecMessage, Notification, Request, Response};
    pub use crate::quorum::{ConfigChange, QuorumEngine, RingId};
    pub use crate::service::{QuorumService, QuorumStatus};
    pub use crate::state::{NodeId, NodeRegistry, NodeState};
}
