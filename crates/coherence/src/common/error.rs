//! Configuration and runtime error definitions.
//!
//! Protocol-level rejections (`NackB`, `NackC`, `NackD`) are ordinary messages and
//! never surface here. This module covers:
//! 1. **Configuration Errors:** Invalid geometry or protocol parameters, unreadable config files.
//! 2. **Runtime Errors:** API misuse at the local controller port, undecodable opcodes,
//!    simulations that fail to quiesce, and invariant violations found by the checkers.

use std::path::PathBuf;

use thiserror::Error;

use super::addr::{BlockAddr, NodeId};

/// Errors raised while loading or validating a [`Config`](crate::config::Config).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A store geometry parameter is zero or not a power of two.
    #[error("{field} must be a non-zero power of two, got {value}")]
    Geometry {
        /// Dotted path of the offending field.
        field: &'static str,
        /// The rejected value.
        value: usize,
    },

    /// A field is outside its permitted range.
    #[error("{field} = {value} is out of range ({expected})")]
    OutOfRange {
        /// Dotted path of the offending field.
        field: &'static str,
        /// The rejected value.
        value: u64,
        /// Human-readable description of the valid range.
        expected: &'static str,
    },

    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration text is not valid JSON for [`Config`](crate::config::Config).
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Runtime errors reported by the engines, the local controller port, and the simulator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoherenceError {
    /// A wire code does not name any protocol opcode.
    #[error("unknown opcode encoding {0:#x}")]
    UnknownOpcode(u8),

    /// A node id is the reserved directory id or outside the configured node range.
    #[error("invalid cache node id {0}")]
    InvalidNode(NodeId),

    /// The local controller submitted a request while another is still in flight.
    #[error("local port busy: request for {pending} still outstanding")]
    PortBusy {
        /// Address of the request that is still outstanding.
        pending: BlockAddr,
    },

    /// A local store targeted a line that is absent or not held with write permission.
    #[error("line {addr} is not writable on {node}")]
    NotWritable {
        /// Node that attempted the store.
        node: NodeId,
        /// Block address of the store.
        addr: BlockAddr,
    },

    /// The simulation did not reach quiescence within the cycle budget.
    #[error("system not quiescent after {cycles} cycles")]
    Timeout {
        /// Number of cycles that were simulated.
        cycles: u64,
    },

    /// A coherence or bookkeeping invariant does not hold.
    #[error("invariant violated at {addr}: {detail}")]
    Invariant {
        /// Block the violation was found on.
        addr: BlockAddr,
        /// Description of the violated invariant.
        detail: String,
    },
}
