//! Block address and node identifier types.
//!
//! This module defines strong types for the values carried by every protocol message:
//! 1. **Block Addresses:** Byte addresses of coherence blocks, split into set index and tag by the stores.
//! 2. **Node Identifiers:** Network endpoints, with id 0 reserved for the home directory.
//! 3. **Line Data:** The payload carried by data grants and writebacks.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Payload of one coherence block as carried by `Data`, `DataS`, `PutM`, and `RespPutM`.
pub type LineData = u64;

/// Byte address of a coherence block.
///
/// The stores derive the set index and tag from this value and their own geometry;
/// the engines only compare block addresses for equality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockAddr(pub u64);

impl BlockAddr {
    /// Creates a block address from a raw 64-bit value.
    #[inline(always)]
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Returns the raw 64-bit address value.
    #[inline(always)]
    pub const fn val(self) -> u64 {
        self.0
    }

    /// Rounds the address down to the start of its block.
    ///
    /// # Arguments
    ///
    /// * `line_bytes` - Block size in bytes (a power of two).
    pub const fn align(self, line_bytes: u64) -> Self {
        Self(self.0 & !(line_bytes - 1))
    }
}

impl fmt::Display for BlockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Network endpoint identifier.
///
/// Id 0 is the home directory. Cache nodes are numbered from 1, so a sharer slot
/// never has to overload a real node id as its "empty" marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u16);

impl NodeId {
    /// The home directory's id.
    pub const DIRECTORY: Self = Self(0);

    /// Returns `true` for the home directory id.
    pub const fn is_directory(self) -> bool {
        self.0 == 0
    }

    /// Index of a cache node into zero-based per-node tables (`id - 1`).
    ///
    /// # Returns
    ///
    /// `None` for the directory id.
    pub const fn node_index(self) -> Option<usize> {
        match self.0 {
            0 => None,
            n => Some(n as usize - 1),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_directory() {
            write!(f, "dir")
        } else {
            write!(f, "n{}", self.0)
        }
    }
}
