//! Client Request Handlers
//!
//! Validates locally initiated changes before they are broadcast. Nothing
//! here mutates vote state directly: accepted changes travel through the
//! group transport and are applied on delivery, like everyone else's.

use crate::error::{Error, Result};
use crate::protocol::{InfoReply, ReconfigParam, Request, Response};
use crate::state::{NodeId, QUORUM_DEVICE_ID};

use super::{calculate_quorum, validate_threshold, ConnectionId, QuorumEngine};

impl QuorumEngine {
    /// Handle a request from local client `conn`
    pub fn handle_request(&mut self, conn: ConnectionId, request: Request) -> Response {
        tracing::debug!("Request {} from connection {}", request.type_name(), conn);

        let result = match request {
            Request::GetInfo { node_id } => self.get_info(node_id).map(Response::Info),
            Request::SetExpected { expected_votes } => {
                self.set_expected(expected_votes).map(|_| Response::Ok)
            }
            Request::SetVotes { node_id, votes } => {
                self.set_votes(node_id, votes).map(|_| Response::Ok)
            }
            Request::Leave => self.leave().map(|_| Response::Ok),
            Request::QdeviceRegister { name, votes } => self
                .quorum_device_register(&name, votes)
                .map(|_| Response::Ok),
            Request::QdeviceUnregister => self.quorum_device_unregister().map(|_| Response::Ok),
            Request::QdevicePoll { state } => {
                self.quorum_device_poll(state).map(|_| Response::Ok)
            }
            Request::QdeviceGetInfo => self.quorum_device_info().map(Response::Qdevice),
            Request::TrackStart { flags, context } => {
                self.track_start(conn, flags, context).map(|_| Response::Ok)
            }
            Request::TrackStop => self.track_stop(conn).map(|_| Response::Ok),
        };

        result.unwrap_or_else(|e| {
            tracing::debug!("Request from connection {} failed: {}", conn, e);
            Response::Error {
                code: e.code(),
                message: e.to_string(),
            }
        })
    }

    /// Vote information for `node_id` as seen by this node
    pub fn get_info(&self, node_id: NodeId) -> Result<InfoReply> {
        let node = self
            .registry
            .find(node_id)
            .ok_or_else(|| Error::NotFound(format!("node {}", node_id)))?;
        let calculation = calculate_quorum(&self.registry, &self.policy, self.quorum, false, None);

        Ok(InfoReply {
            node_id: node.node_id,
            votes: node.votes,
            expected_votes: node.expected_votes,
            highest_expected: calculation.highest_expected,
            quorum: self.quorum,
            total_votes: calculation.total_votes,
            two_node: self.policy.two_node,
            quorate: self.quorate,
        })
    }

    /// Validate and broadcast a new cluster-wide expected votes value
    pub fn set_expected(&mut self, expected_votes: u32) -> Result<()> {
        let calculation = calculate_quorum(
            &self.registry,
            &self.policy,
            self.quorum,
            true,
            Some(expected_votes),
        );
        validate_threshold(&calculation)?;

        let local_id = self.registry.local_id();
        self.send_reconfigure(ReconfigParam::ExpectedVotes, local_id, expected_votes);
        Ok(())
    }

    /// Validate and broadcast a vote change for `node_id`
    pub fn set_votes(&mut self, node_id: NodeId, votes: u32) -> Result<()> {
        // The quorum device is local to each node and never reconfigured by peers
        if node_id == QUORUM_DEVICE_ID {
            return Err(Error::InvalidParameter(
                "quorum device votes are set at registration".into(),
            ));
        }

        let node = self
            .registry
            .find_mut(node_id)
            .ok_or_else(|| Error::NotFound(format!("node {}", node_id)))?;
        let target = node.node_id;

        // Try the new weight, then put the old one back either way
        let saved = std::mem::replace(&mut node.votes, votes);
        let calculation = calculate_quorum(&self.registry, &self.policy, self.quorum, true, None);
        if let Some(node) = self.registry.find_mut(target) {
            node.votes = saved;
        }
        validate_threshold(&calculation)?;

        self.send_reconfigure(ReconfigParam::NodeVotes, target, votes);
        Ok(())
    }
}
