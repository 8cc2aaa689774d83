//! Coherence protocol vocabulary.
//!
//! This module defines what travels between the directory and the cache nodes:
//! 1. **Opcodes:** The fixed opcode set, its grouping, and its wire encoding.
//! 2. **Messages:** Address, endpoints, requestor, and payload of one protocol message.

/// Protocol message structure.
pub mod message;

/// Opcode set and encoding table.
pub mod opcode;

pub use message::Message;
pub use opcode::{MIN_OPCODE_BITS, Opcode, OpcodeGroup};
