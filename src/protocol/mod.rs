//! Protocol Module
//!
//! Wire formats: exec messages replicated between quorum engines and the
//! request/notification protocol spoken with local clients.

pub mod exec;
pub mod ipc;

pub use exec::{ExecMessage, NodeInfo, ReconfigParam};
pub use ipc::{
    ErrorCode, InfoReply, NodeEntry, Notification, QdeviceInfo, QuorumNotification, Request,
    Response, ServerFrame, TRACK_CHANGES, TRACK_CHANGES_ONLY, TRACK_CURRENT,
};
