//! Least Recently Used (LRU) Replacement Policy.
//!
//! Keeps a recency stack per set. A touched way moves to the front; the victim is
//! the way at the back.
//!
//! # Performance
//!
//! - `touch()`: O(W) where W is the associativity
//! - `victim()`: O(1)
//! - Space: O(S × W)

use super::ReplacementPolicy;

/// LRU policy state.
#[derive(Debug)]
pub struct LruPolicy {
    /// One recency stack per set; index 0 is most recent.
    stacks: Vec<Vec<usize>>,
}

impl LruPolicy {
    /// Creates an LRU policy for `sets` sets of `ways` ways.
    pub fn new(sets: usize, ways: usize) -> Self {
        Self {
            stacks: (0..sets).map(|_| (0..ways).collect()).collect(),
        }
    }
}

impl ReplacementPolicy for LruPolicy {
    fn touch(&mut self, set: usize, way: usize) {
        let stack = &mut self.stacks[set];
        if let Some(pos) = stack.iter().position(|&w| w == way) {
            let _ = stack.remove(pos);
        }
        stack.insert(0, way);
    }

    fn victim(&mut self, set: usize) -> usize {
        self.stacks[set].last().copied().unwrap_or(0)
    }
}
