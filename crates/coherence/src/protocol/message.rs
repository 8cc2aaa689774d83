//! Protocol message structure.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::opcode::Opcode;
use crate::common::addr::{BlockAddr, LineData, NodeId};

/// One protocol message on the wire.
///
/// `requestor` names the node whose request caused this message; for forwards it
/// is the node being served, for everything else it equals `src` or the
/// destination of the eventual grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind.
    pub opcode: Opcode,
    /// Block the message refers to.
    pub addr: BlockAddr,
    /// Sending endpoint.
    pub src: NodeId,
    /// Receiving endpoint.
    pub dst: NodeId,
    /// Node whose request this message serves.
    pub requestor: NodeId,
    /// Block payload; meaningful only when `opcode.carries_data()`.
    pub data: LineData,
}

impl Message {
    /// Builds a message whose requestor is its sender.
    pub const fn new(opcode: Opcode, addr: BlockAddr, src: NodeId, dst: NodeId) -> Self {
        Self {
            opcode,
            addr,
            src,
            dst,
            requestor: src,
            data: 0,
        }
    }

    /// Returns a copy carrying `data`.
    #[must_use]
    pub const fn with_data(mut self, data: LineData) -> Self {
        self.data = data;
        self
    }

    /// Returns a copy naming `requestor`.
    #[must_use]
    pub const fn with_requestor(mut self, requestor: NodeId) -> Self {
        self.requestor = requestor;
        self
    }

    /// Builds a reply of kind `opcode` travelling back to this message's sender.
    pub const fn reply(&self, opcode: Opcode) -> Self {
        Self {
            opcode,
            addr: self.addr,
            src: self.dst,
            dst: self.src,
            requestor: self.requestor,
            data: 0,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}->{}",
            self.opcode, self.addr, self.src, self.dst
        )?;
        if self.requestor != self.src {
            write!(f, " for {}", self.requestor)?;
        }
        if self.opcode.carries_data() {
            write!(f, " data={:#x}", self.data)?;
        }
        Ok(())
    }
}
