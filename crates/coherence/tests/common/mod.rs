//! Shared test infrastructure for the coherence engines.


/// Directory and node harnesses.
pub mod harness;
