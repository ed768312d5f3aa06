//! Exec Protocol
//!
//! Fixed-layout messages replicated to every group member through the
//! atomic broadcast. Fields are written in the sender's native byte order;
//! the first header byte names that order so receivers can normalise it.

use std::io::Cursor;

use byteorder::{BigEndian, ByteOrder, LittleEndian, NativeEndian, ReadBytesExt};

use crate::error::{Error, Result};
use crate::state::NodeId;

/// Protocol version triple (major is not backwards compatible)
pub const PROTOCOL_MAJOR: u32 = 7;
pub const PROTOCOL_MINOR: u32 = 0;
pub const PROTOCOL_PATCH: u32 = 0;

const ORDER_LITTLE: u8 = 0;
const ORDER_BIG: u8 = 1;

const ID_NODEINFO: u8 = 0;
const ID_RECONFIGURE: u8 = 1;

/// Header: byte order, message id, two reserved bytes
const HEADER_SIZE: usize = 4;
const NODEINFO_FIELDS: usize = 10;
const RECONFIGURE_FIELDS: usize = 3;

fn native_order() -> u8 {
    if cfg!(target_endian = "big") {
        ORDER_BIG
    } else {
        ORDER_LITTLE
    }
}

/// Vote state a node announces about itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub first_trans: bool,
    pub votes: u32,
    pub expected_votes: u32,
    pub major_version: u32,
    pub minor_version: u32,
    pub patch_version: u32,
    pub config_version: u32,
    pub flags: u32,
    pub wait_for_all_status: bool,
    pub quorate: bool,
}

/// Parameter changed by a Reconfigure message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigParam {
    ExpectedVotes,
    NodeVotes,
    Leaving,
}

impl ReconfigParam {
    fn to_wire(self) -> u32 {
        match self {
            ReconfigParam::ExpectedVotes => 1,
            ReconfigParam::NodeVotes => 2,
            ReconfigParam::Leaving => 3,
        }
    }

    fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(ReconfigParam::ExpectedVotes),
            2 => Some(ReconfigParam::NodeVotes),
            3 => Some(ReconfigParam::Leaving),
            _ => None,
        }
    }
}

/// Messages exchanged between quorum engines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMessage {
    NodeInfo(NodeInfo),
    Reconfigure {
        param: ReconfigParam,
        node_id: NodeId,
        value: u32,
    },
}

impl ExecMessage {
    /// Encode in this host's byte order
    pub fn encode(&self) -> Vec<u8> {
        self.encode_as::<NativeEndian>(native_order())
    }

    fn encode_as<B: ByteOrder>(&self, order: u8) -> Vec<u8> {
        let (id, fields): (u8, Vec<u32>) = match self {
            ExecMessage::NodeInfo(info) => (
                ID_NODEINFO,
                vec![
                    info.first_trans as u32,
                    info.votes,
                    info.expected_votes,
                    info.major_version,
                    info.minor_version,
                    info.patch_version,
                    info.config_version,
                    info.flags,
                    info.wait_for_all_status as u32,
                    info.quorate as u32,
                ],
            ),
            ExecMessage::Reconfigure { param, node_id, value } => {
                (ID_RECONFIGURE, vec![param.to_wire(), *node_id, *value])
            }
        };

        let mut bytes = vec![0u8; HEADER_SIZE + fields.len() * 4];
        bytes[0] = order;
        bytes[1] = id;
        B::write_u32_into(&fields, &mut bytes[HEADER_SIZE..]);
        bytes
    }

    /// Decode a frame, normalising the sender's byte order
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Protocol(format!(
                "exec frame too short: {} bytes",
                bytes.len()
            )));
        }
        let body = &bytes[HEADER_SIZE..];
        match bytes[0] {
            ORDER_LITTLE => Self::decode_body::<LittleEndian>(bytes[1], body),
            ORDER_BIG => Self::decode_body::<BigEndian>(bytes[1], body),
            other => Err(Error::Protocol(format!("unknown byte order marker {}", other))),
        }
    }

    fn decode_body<B: ByteOrder>(id: u8, body: &[u8]) -> Result<Self> {
        let expected = match id {
            ID_NODEINFO => NODEINFO_FIELDS,
            ID_RECONFIGURE => RECONFIGURE_FIELDS,
            other => return Err(Error::UnknownMessage(other)),
        };
        if body.len() < expected * 4 {
            return Err(Error::Protocol(format!(
                "exec message {} truncated: {} bytes",
                id,
                body.len()
            )));
        }

        let mut cursor = Cursor::new(body);
        let mut next = || {
            cursor
                .read_u32::<B>()
                .map_err(|e| Error::Protocol(e.to_string()))
        };

        if id == ID_NODEINFO {
            Ok(ExecMessage::NodeInfo(NodeInfo {
                first_trans: next()? != 0,
                votes: next()?,
                expected_votes: next()?,
                major_version: next()?,
                minor_version: next()?,
                patch_version: next()?,
                config_version: next()?,
                flags: next()?,
                wait_for_all_status: next()? != 0,
                quorate: next()? != 0,
            }))
        } else {
            let raw_param = next()?;
            let param = ReconfigParam::from_wire(raw_param).ok_or_else(|| {
                Error::Protocol(format!("unknown reconfigure parameter {}", raw_param))
            })?;
            Ok(ExecMessage::Reconfigure {
                param,
                node_id: next()?,
                value: next()?,
            })
        }
    }

    /// Get the message type name (for logging)
    pub fn type_name(&self) -> &'static str {
        match self {
            ExecMessage::NodeInfo(_) => "NodeInfo",
            ExecMessage::Reconfigure { .. } => "Reconfigure",
        }
    }
}
