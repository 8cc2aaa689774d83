//! Local controller port of a cache node.
//!
//! The node's own cache controller talks to the responder in local-bus terms;
//! the responder translates these to and from wire opcodes.

use serde::{Deserialize, Serialize};

use crate::common::addr::{BlockAddr, LineData};
use crate::common::mesi::MesiState;
use crate::protocol::Opcode;

/// Local-bus request kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalOp {
    /// Load miss.
    ReadMiss,
    /// Store miss on an absent line.
    ReadForOwnership,
    /// Store to a line held Shared.
    Upgrade,
    /// Dirty eviction.
    Writeback,
    /// Clean eviction.
    Evict,
}

impl LocalOp {
    /// Wire opcode this local request is sent as.
    pub const fn wire_opcode(self) -> Opcode {
        match self {
            Self::ReadMiss => Opcode::GetS,
            Self::ReadForOwnership | Self::Upgrade => Opcode::GetM,
            Self::Writeback => Opcode::PutM,
            Self::Evict => Opcode::PutS,
        }
    }

    /// Returns `true` for the two eviction kinds.
    pub const fn is_eviction(self) -> bool {
        matches!(self, Self::Writeback | Self::Evict)
    }
}

/// A request from the local controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRequest {
    /// Request kind.
    pub op: LocalOp,
    /// Block address.
    pub addr: BlockAddr,
    /// Store value for ownership requests; ignored otherwise.
    pub data: LineData,
}

impl LocalRequest {
    /// Builds a request carrying no data.
    pub const fn new(op: LocalOp, addr: BlockAddr) -> Self {
        Self { op, addr, data: 0 }
    }

    /// Builds an ownership request that stores `data` once granted.
    pub const fn store(op: LocalOp, addr: BlockAddr, data: LineData) -> Self {
        Self { op, addr, data }
    }
}

/// What a forwarded probe asks the controller to do with its copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForwardKind {
    /// Downgrade to Shared.
    Share,
    /// Give the copy up.
    Flush,
}

/// Notification from the responder to the local controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocalEvent {
    /// The outstanding miss was granted and the line installed.
    Fill {
        /// Block address.
        addr: BlockAddr,
        /// State the line was installed in.
        state: MesiState,
        /// Line contents after the fill (including the store of an ownership request).
        data: LineData,
    },
    /// The directory acknowledged a requested eviction.
    EvictDone {
        /// Block address.
        addr: BlockAddr,
    },
    /// A probe hit a line shared with an upper level; answer with `forward_done`.
    Forward {
        /// Block address.
        addr: BlockAddr,
        /// Requested action.
        kind: ForwardKind,
        /// Line contents held at this level.
        data: LineData,
    },
}

/// Controller answer to a [`LocalEvent::Forward`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardReply {
    /// Block address.
    pub addr: BlockAddr,
    /// Newer data held dirty in the upper level, if any.
    pub data: Option<LineData>,
}
