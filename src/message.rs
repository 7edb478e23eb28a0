//! Protocol message types — a tagged sum, not an open-coded struct with an
//! always-present-but-often-unused payload array.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum MessageKind {
    ReadReq = 0,
    ReadResp = 1,
    WriteReq = 2,
    WriteResp = 3,
    Invalidate = 4,
    InvalidateAck = 5,
}

impl MessageKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::ReadReq,
            1 => Self::ReadResp,
            2 => Self::WriteReq,
            3 => Self::WriteResp,
            4 => Self::Invalidate,
            5 => Self::InvalidateAck,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    ReadReq {
        block_id: u32,
    },
    ReadResp {
        block_id: u32,
        data: Vec<u8>,
    },
    WriteReq {
        block_id: u32,
        position: u32,
        data: Vec<u8>,
    },
    WriteResp {
        block_id: u32,
    },
    Invalidate {
        block_id: u32,
    },
    InvalidateAck {
        block_id: u32,
    },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ReadReq { .. } => MessageKind::ReadReq,
            Message::ReadResp { .. } => MessageKind::ReadResp,
            Message::WriteReq { .. } => MessageKind::WriteReq,
            Message::WriteResp { .. } => MessageKind::WriteResp,
            Message::Invalidate { .. } => MessageKind::Invalidate,
            Message::InvalidateAck { .. } => MessageKind::InvalidateAck,
        }
    }

    pub fn block_id(&self) -> u32 {
        match self {
            Message::ReadReq { block_id }
            | Message::ReadResp { block_id, .. }
            | Message::WriteReq { block_id, .. }
            | Message::WriteResp { block_id }
            | Message::Invalidate { block_id }
            | Message::InvalidateAck { block_id } => *block_id,
        }
    }

    /// Unsolicited traffic the inbound dispatcher must act on, as opposed
    /// to a response consumed only by an explicit waiter.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Message::ReadReq { .. } | Message::WriteReq { .. } | Message::Invalidate { .. }
        )
    }

    /// Requests that must be serviced in strict receive order by a single
    /// owner-side worker, per §4.2's "single-flight per peer": two
    /// READ_REQ/WRITE_REQ for the same block must not be applied
    /// out of order. `Invalidate` is excluded — it carries no write
    /// ordering requirement (idempotent per spec) and must be dispatched
    /// independently so it is never stuck queued behind an in-flight
    /// WRITE_REQ that is itself waiting on an INVALIDATE_ACK from the same
    /// peer that sent it.
    pub fn requires_ordered_dispatch(&self) -> bool {
        matches!(self, Message::ReadReq { .. } | Message::WriteReq { .. })
    }
}

/// A message plus the routing fields the wire header carries alongside it.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub source: u32,
    pub target: u32,
    pub message: Message,
}

impl Envelope {
    pub fn new(source: u32, target: u32, message: Message) -> Self {
        Self {
            source,
            target,
            message,
        }
    }
}
