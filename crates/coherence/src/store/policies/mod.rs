//! Replacement policies for the set-associative stores.
//!
//! A store asks its policy for a victim only when a lookup misses and every way
//! of the set is valid.
//!
//! # Policies
//!
//! - `Lru`: Least Recently Used.
//! - `Fifo`: First-In, First-Out (round-robin per set).
//! - `Random`: xorshift pseudo-random selection.

/// First-In, First-Out replacement policy.
pub mod fifo;

/// Least Recently Used replacement policy.
pub mod lru;

/// Random replacement policy.
pub mod random;

pub use fifo::FifoPolicy;
pub use lru::LruPolicy;
pub use random::RandomPolicy;

use crate::config::ReplacementPolicy as PolicyType;

/// Victim selection for one store.
pub trait ReplacementPolicy: Send + Sync + std::fmt::Debug {
    /// Records that `way` of `set` was written or hit.
    ///
    /// # Arguments
    ///
    /// * `set` - The set index.
    /// * `way` - The way index within the set that was touched.
    fn touch(&mut self, set: usize, way: usize);

    /// Chooses the way of `set` to displace.
    ///
    /// # Returns
    ///
    /// A way index in `0..ways`.
    fn victim(&mut self, set: usize) -> usize;
}

/// Builds the policy named in the configuration.
///
/// # Arguments
///
/// * `kind` - Policy selection from the config.
/// * `sets` - Number of sets in the store.
/// * `ways` - Associativity of the store.
pub fn build(kind: PolicyType, sets: usize, ways: usize) -> Box<dyn ReplacementPolicy> {
    match kind {
        PolicyType::Lru => Box::new(LruPolicy::new(sets, ways)),
        PolicyType::Fifo => Box::new(FifoPolicy::new(sets, ways)),
        PolicyType::Random => Box::new(RandomPolicy::new(ways)),
    }
}
