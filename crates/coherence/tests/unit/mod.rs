/// Configuration defaults, JSON loading, and validation.
pub mod config;

/// Opcode encoding and message helpers.
pub mod protocol;


/// Set-associative stores and replacement policies.
pub mod store;

/// Memory port sub-FSM against a mocked backing store.
pub mod memory_port;

/// Active transaction table.
pub mod transactions;




/// Multi-node system runs and coherence checks.
pub mod system;
