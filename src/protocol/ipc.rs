//! IPC Protocol
//!
//! Request/response pairs exchanged with local clients, plus the
//! notifications pushed to connections that track quorum changes.

use serde::{Deserialize, Serialize};

use crate::quorum::RingId;
use crate::state::{NodeId, NodeState};

/// Maximum quorum device name length in bytes
pub const MAX_QDEVICE_NAME_LEN: usize = 255;

/// Track flag: send the current status immediately
pub const TRACK_CURRENT: u8 = 1;
/// Track flag: send the current status and every later change
pub const TRACK_CHANGES: u8 = 2;
/// Track flag: send later changes only
pub const TRACK_CHANGES_ONLY: u8 = 4;

/// Requests accepted from local clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// Vote information as seen from `node_id`
    GetInfo { node_id: NodeId },
    /// Lower (or raise) the cluster-wide expected votes
    SetExpected { expected_votes: u32 },
    /// Change a node's vote weight
    SetVotes { node_id: NodeId, votes: u32 },
    /// Announce that this node is about to leave
    Leave,
    /// Register the quorum device
    QdeviceRegister { name: String, votes: u32 },
    /// Unregister the quorum device
    QdeviceUnregister,
    /// Report quorum device liveness
    QdevicePoll { state: bool },
    /// Quorum device information
    QdeviceGetInfo,
    /// Subscribe this connection to notifications
    TrackStart { flags: u8, context: u64 },
    /// Unsubscribe this connection
    TrackStop,
}

impl Request {
    /// Get the request type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            Request::GetInfo { .. } => "GetInfo",
            Request::SetExpected { .. } => "SetExpected",
            Request::SetVotes { .. } => "SetVotes",
            Request::Leave => "Leave",
            Request::QdeviceRegister { .. } => "QdeviceRegister",
            Request::QdeviceUnregister => "QdeviceUnregister",
            Request::QdevicePoll { .. } => "QdevicePoll",
            Request::QdeviceGetInfo => "QdeviceGetInfo",
            Request::TrackStart { .. } => "TrackStart",
            Request::TrackStop => "TrackStop",
        }
    }
}

/// Reply to a GetInfo request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoReply {
    pub node_id: NodeId,
    pub votes: u32,
    pub expected_votes: u32,
    pub highest_expected: u32,
    pub quorum: u32,
    pub total_votes: u32,
    pub two_node: bool,
    pub quorate: bool,
}

/// Reply to a QdeviceGetInfo request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QdeviceInfo {
    pub name: String,
    pub votes: u32,
    pub alive: bool,
}

/// Error codes for client-facing errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidParameter,
    NotFound,
    AlreadyExists,
    ResourceExhausted,
    InvalidRequest,
    Internal,
}

/// Responses to client requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Info(InfoReply),
    Qdevice(QdeviceInfo),
    Error { code: ErrorCode, message: String },
}

/// One entry of a quorum notification's node list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub node_id: NodeId,
    pub state: NodeState,
    pub quorum_device: bool,
}

/// Full quorum status pushed to trackers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumNotification {
    pub context: u64,
    pub quorate: bool,
    pub ring_id: RingId,
    pub nodes: Vec<NodeEntry>,
}

/// Notifications pushed to tracking connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notification {
    Quorum(QuorumNotification),
    ExpectedVotes { context: u64, expected_votes: u32 },
}

/// Frames written by the IPC server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    Response(Response),
    Notification(Notification),
}
