//! Protocol opcodes and their wire encoding.
//!
//! The opcode space is split into disjoint classes: requests from cache nodes,
//! responses from cache nodes, forwards and grants from the directory, and the
//! admission rejection. The numeric table below is the encoding for one
//! deployment; testbenches compare these literal values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::common::error::CoherenceError;

/// Narrowest opcode width that can hold every code in the table.
pub const MIN_OPCODE_BITS: u32 = 4;

/// Protocol message kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Read miss: request a readable copy.
    GetS,
    /// Write miss or upgrade: request the sole writable copy.
    GetM,
    /// Dirty writeback on eviction.
    PutM,
    /// Clean relinquish on eviction.
    PutS,
    /// Clean hand-off acknowledging a forward.
    PutE,
    /// Invalidation acknowledgment.
    InvAck,
    /// Line not present at the responder.
    NackD,
    /// Responder-level reject (inbound queue full).
    NackC,
    /// Dirty data returned in answer to a forward or invalidation.
    RespPutM,
    /// Forward-share: downgrade to Shared and hand the block off.
    FwdGetS,
    /// Invalidate the local copy.
    Inv,
    /// Exclusive (or Modified) data grant.
    Data,
    /// Shared data grant.
    DataS,
    /// Writeback or relinquish acknowledged.
    PutAck,
    /// Directory admission reject.
    NackB,
}

/// Coarse grouping of opcodes by who sends them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpcodeGroup {
    /// Cache node to directory requests.
    Request,
    /// Cache node to directory responses.
    Response,
    /// Directory to cache node probes.
    Forward,
    /// Directory to cache node grants and acknowledgments.
    Grant,
    /// Directory admission rejection.
    Reject,
}

const ENCODING: [(Opcode, u8); 15] = [
    (Opcode::GetS, 0x0),
    (Opcode::GetM, 0x1),
    (Opcode::PutM, 0x2),
    (Opcode::PutS, 0x3),
    (Opcode::PutE, 0x4),
    (Opcode::InvAck, 0x5),
    (Opcode::NackD, 0x6),
    (Opcode::NackC, 0x7),
    (Opcode::RespPutM, 0x8),
    (Opcode::FwdGetS, 0x9),
    (Opcode::Inv, 0xA),
    (Opcode::Data, 0xB),
    (Opcode::DataS, 0xC),
    (Opcode::PutAck, 0xD),
    (Opcode::NackB, 0xE),
];

impl Opcode {
    /// Every opcode, in encoding order.
    pub const ALL: [Self; 15] = [
        Self::GetS,
        Self::GetM,
        Self::PutM,
        Self::PutS,
        Self::PutE,
        Self::InvAck,
        Self::NackD,
        Self::NackC,
        Self::RespPutM,
        Self::FwdGetS,
        Self::Inv,
        Self::Data,
        Self::DataS,
        Self::PutAck,
        Self::NackB,
    ];

    /// Wire encoding of this opcode.
    pub const fn code(self) -> u8 {
        ENCODING[self as usize].1
    }

    /// Decodes a wire value.
    ///
    /// # Errors
    ///
    /// Returns [`CoherenceError::UnknownOpcode`] for values outside the table.
    pub fn from_code(code: u8) -> Result<Self, CoherenceError> {
        ENCODING
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(op, _)| *op)
            .ok_or(CoherenceError::UnknownOpcode(code))
    }

    /// Group this opcode belongs to.
    pub const fn group(self) -> OpcodeGroup {
        match self {
            Self::GetS | Self::GetM | Self::PutM | Self::PutS => OpcodeGroup::Request,
            Self::PutE | Self::InvAck | Self::NackD | Self::NackC | Self::RespPutM => {
                OpcodeGroup::Response
            }
            Self::FwdGetS | Self::Inv => OpcodeGroup::Forward,
            Self::Data | Self::DataS | Self::PutAck => OpcodeGroup::Grant,
            Self::NackB => OpcodeGroup::Reject,
        }
    }

    /// Returns `true` for opcodes whose payload carries block data.
    pub const fn carries_data(self) -> bool {
        matches!(self, Self::PutM | Self::RespPutM | Self::Data | Self::DataS)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
