//! Slot selection helpers.
//!
//! Software stand-ins for the priority encoder and round-robin arbiter found in
//! hardware coherence controllers: plain searches over bitmasks and slot indices.

/// Index of the lowest set bit of `mask`, if any.
pub const fn first_set_bit(mask: u64) -> Option<usize> {
    if mask == 0 {
        None
    } else {
        Some(mask.trailing_zeros() as usize)
    }
}

/// Round-robin grant over `len` candidates.
///
/// Searches `start, start + 1, ..` (wrapping) and returns the first index for which
/// `ready` holds. Callers advance `start` past the granted index so every
/// candidate is eventually served.
pub fn round_robin(start: usize, len: usize, mut ready: impl FnMut(usize) -> bool) -> Option<usize> {
    (0..len).map(|i| (start + i) % len).find(|&i| ready(i))
}
