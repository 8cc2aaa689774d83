//! Workload traces for the simulator.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::common::addr::{BlockAddr, LineData, NodeId};
use crate::common::error::ConfigError;

/// Access a driver performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    /// Load the block.
    Read,
    /// Store `value` to the block.
    Write,
    /// Evict the block from the node.
    Evict,
}

/// One access of a workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceOp {
    /// Node performing the access.
    pub node: NodeId,
    /// Access kind.
    pub op: AccessKind,
    /// Block address.
    pub addr: BlockAddr,
    /// Store value; ignored for reads and evictions.
    #[serde(default)]
    pub value: LineData,
}

impl TraceOp {
    /// A read by `node`.
    pub const fn read(node: u16, addr: u64) -> Self {
        Self {
            node: NodeId(node),
            op: AccessKind::Read,
            addr: BlockAddr(addr),
            value: 0,
        }
    }

    /// A write of `value` by `node`.
    pub const fn write(node: u16, addr: u64, value: LineData) -> Self {
        Self {
            node: NodeId(node),
            op: AccessKind::Write,
            addr: BlockAddr(addr),
            value,
        }
    }

    /// An eviction by `node`.
    pub const fn evict(node: u16, addr: u64) -> Self {
        Self {
            node: NodeId(node),
            op: AccessKind::Evict,
            addr: BlockAddr(addr),
            value: 0,
        }
    }
}

/// Ordered list of accesses.
///
/// # Examples
///
/// ```
/// use coherence_core::sim::workload::{AccessKind, Workload};
///
/// let json = r#"{
///     "sequential": true,
///     "ops": [
///         { "node": 1, "op": "write", "addr": 256, "value": 7 },
///         { "node": 2, "op": "read", "addr": 256 }
///     ]
/// }"#;
/// let workload = Workload::from_json_str(json).unwrap();
/// assert!(workload.sequential);
/// assert_eq!(workload.ops[1].op, AccessKind::Read);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    /// Run each access to quiescence before issuing the next; otherwise every
    /// node works through its own accesses concurrently.
    #[serde(default)]
    pub sequential: bool,
    /// Accesses in program order.
    pub ops: Vec<TraceOp>,
}

impl Workload {
    /// Parses a workload from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON workload file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`Workload::from_json_str`].
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Three reads of block `0x100` by nodes 3, 7, and 4, one after another.
    ///
    /// With two sharer slots the third read finds the sharer list full and the
    /// directory invalidates node 3 to make room.
    pub fn reference_scenario() -> Self {
        Self {
            sequential: true,
            ops: vec![
                TraceOp::read(3, 0x100),
                TraceOp::read(7, 0x100),
                TraceOp::read(4, 0x100),
            ],
        }
    }
}
