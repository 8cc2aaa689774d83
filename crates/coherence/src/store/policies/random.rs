//! Random Replacement Policy.
//!
//! Uses a xorshift generator with a fixed seed so runs stay reproducible.

use super::ReplacementPolicy;

/// Random policy state.
#[derive(Debug)]
pub struct RandomPolicy {
    ways: usize,
    state: u64,
}

impl RandomPolicy {
    /// Creates a random policy choosing among `ways` ways.
    pub const fn new(ways: usize) -> Self {
        Self {
            ways,
            state: 0x9E37_79B9_7F4A_7C15,
        }
    }
}

impl ReplacementPolicy for RandomPolicy {
    fn touch(&mut self, _set: usize, _way: usize) {}

    fn victim(&mut self, _set: usize) -> usize {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        (x % self.ways as u64) as usize
    }
}
