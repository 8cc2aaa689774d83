//! First-In, First-Out (FIFO) Replacement Policy.
//!
//! A per-set pointer names the next way to displace and advances whenever that
//! way is filled, so ways are replaced in fill order.

use super::ReplacementPolicy;

/// FIFO policy state.
#[derive(Debug)]
pub struct FifoPolicy {
    next: Vec<usize>,
    ways: usize,
}

impl FifoPolicy {
    /// Creates a FIFO policy for `sets` sets of `ways` ways.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            next: vec![0; sets],
            ways,
        }
    }
}

impl ReplacementPolicy for FifoPolicy {
    fn touch(&mut self, set: usize, way: usize) {
        if self.next[set] == way {
            self.next[set] = (way + 1) % self.ways;
        }
    }

    fn victim(&mut self, set: usize) -> usize {
        self.next[set]
    }
}
