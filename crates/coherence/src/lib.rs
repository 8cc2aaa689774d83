//! Directory-based MESI coherence engine library.
//!
//! This crate implements a cycle-stepped directory coherence protocol with the following:
//! 1. **Directory:** Home-node engine owning the sharer directory and the active transaction table.
//! 2. **Responder:** Cache-node engine answering forwards/invalidations against its local lines.
//! 3. **Stores:** Set-associative directory and line storage with pluggable replacement policies.
//! 4. **Channel & Memory:** Message classification/backpressure and the backing-store port.
//! 5. **Simulation:** Multi-node system wiring, workload drivers, configuration, and statistics.

/// Common types (addresses, node ids, MESI state, errors).
pub mod common;
/// Engine configuration (defaults, enums, hierarchical config structures).
pub mod config;
/// Message classification, bounded queues, and backpressure.
pub mod channel;
/// Directory coherence engine (home node FSM and active transaction table).
pub mod directory;
/// Backing store, latency controllers, and the memory port adapter.
pub mod memory;
/// Protocol opcodes and messages.
pub mod protocol;
/// Cache coherence responder (node FSM and local controller interface).
pub mod responder;
/// Multi-node system, transport, and workload drivers.
pub mod sim;
/// Simulation statistics collection and reporting.
pub mod stats;
/// Set-associative directory and line storage.
pub mod store;

/// Root configuration type; use `Config::default()` or load it from JSON.
pub use crate::config::Config;
/// Home-node coherence engine.
pub use crate::directory::DirectoryEngine;
/// Node-side coherence responder.
pub use crate::responder::CacheResponder;
/// Top-level multi-node system; construct with `System::new`.
pub use crate::sim::System;
