//! Common types shared across the coherence engines.
//!
//! This module provides the fundamental building blocks used by every component:
//! 1. **Address Types:** Block addresses, node identifiers, and line payloads.
//! 2. **MESI:** The four coherence states and the directory class derivation.
//! 3. **Error Handling:** Configuration and runtime error types.
//! 4. **Selection:** Priority and round-robin pickers over slot tables and bitmasks.

/// Block address, node id, and line data types.
pub mod addr;

/// Error types for configuration and runtime failures.
pub mod error;

/// MESI coherence states.
pub mod mesi;

/// Slot selection helpers (first set bit, round-robin grant).
pub mod select;

pub use addr::{BlockAddr, LineData, NodeId};
pub use error::{CoherenceError, ConfigError};
pub use mesi::MesiState;
