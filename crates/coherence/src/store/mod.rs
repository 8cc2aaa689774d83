//! Set-associative storage for directory entries and node lines.
//!
//! Both the home directory and every cache node keep their per-block state in a
//! set-associative array. This module provides the shared pieces:
//! 1. **Geometry:** Splitting a block address into set index and tag, and back.
//! 2. **Lookup:** Hit with way, or miss with either a free way or a policy-chosen victim.
//! 3. **Policies:** Pluggable replacement (LRU, FIFO, Random).
//!
//! The directory and line stores wrap [`SetAssociative`] with their own line types.

/// Sharer directory store (home node).
pub mod directory;

/// Line cache store (cache node).
pub mod line_cache;

/// Replacement policy implementations.
pub mod policies;

use self::policies::ReplacementPolicy;
use crate::common::addr::BlockAddr;
use crate::config::ReplacementPolicy as PolicyType;

/// Set/way/block-size shape of a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Geometry {
    /// Number of sets (power of two).
    pub sets: usize,
    /// Ways per set.
    pub ways: usize,
    /// Block size in bytes (power of two).
    pub line_bytes: usize,
}

impl Geometry {
    /// Set an address maps to.
    pub const fn set_index(&self, addr: BlockAddr) -> usize {
        ((addr.0 / self.line_bytes as u64) % self.sets as u64) as usize
    }

    /// Tag stored for an address.
    pub const fn tag(&self, addr: BlockAddr) -> u64 {
        addr.0 / (self.line_bytes as u64 * self.sets as u64)
    }

    /// Rebuilds the block address held in `set` under `tag`.
    pub const fn block_addr(&self, set: usize, tag: u64) -> BlockAddr {
        BlockAddr((tag * self.sets as u64 + set as u64) * self.line_bytes as u64)
    }
}

/// Per-way metadata a store needs from its line type.
pub trait StoreLine: Clone + Default {
    /// Returns `true` when the way holds a block.
    fn is_valid(&self) -> bool;
    /// Tag of the held block.
    fn tag(&self) -> u64;
    /// Records the tag of a newly written block.
    fn set_tag(&mut self, tag: u64);
}

/// Result of looking up a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup<L> {
    /// The block is present in `way`.
    Hit {
        /// Way holding the block.
        way: usize,
        /// Copy of the stored line.
        line: L,
    },
    /// The block is absent; `way` is where it would be installed.
    Miss {
        /// Free way, or the way chosen for replacement.
        way: usize,
        /// Block currently held in `way`, when no free way exists.
        victim: Option<(BlockAddr, L)>,
    },
}

impl<L> Lookup<L> {
    /// Way the lookup resolved to.
    pub const fn way(&self) -> usize {
        match self {
            Self::Hit { way, .. } | Self::Miss { way, .. } => *way,
        }
    }

    /// Returns `true` for a hit.
    pub const fn is_hit(&self) -> bool {
        matches!(self, Self::Hit { .. })
    }
}

/// Set-associative array of `L` with a replacement policy.
#[derive(Debug)]
pub struct SetAssociative<L> {
    geometry: Geometry,
    lines: Vec<L>,
    policy: Box<dyn ReplacementPolicy>,
}

impl<L: StoreLine> SetAssociative<L> {
    /// Creates an empty store.
    pub fn new(geometry: Geometry, policy: PolicyType) -> Self {
        Self {
            geometry,
            lines: vec![L::default(); geometry.sets * geometry.ways],
            policy: policies::build(policy, geometry.sets, geometry.ways),
        }
    }

    /// Shape of the store.
    pub const fn geometry(&self) -> Geometry {
        self.geometry
    }

    fn slot(&self, set: usize, way: usize) -> usize {
        set * self.geometry.ways + way
    }

    fn find_way(&self, addr: BlockAddr) -> Option<usize> {
        let set = self.geometry.set_index(addr);
        let tag = self.geometry.tag(addr);
        (0..self.geometry.ways).find(|&way| {
            let line = &self.lines[self.slot(set, way)];
            line.is_valid() && line.tag() == tag
        })
    }

    /// Looks a block up, choosing an install way on a miss.
    ///
    /// A miss prefers the lowest-numbered invalid way; only a full set consults the
    /// replacement policy and reports the displaced block as `victim`.
    pub fn lookup(&mut self, addr: BlockAddr) -> Lookup<L> {
        let set = self.geometry.set_index(addr);
        if let Some(way) = self.find_way(addr) {
            return Lookup::Hit {
                way,
                line: self.lines[self.slot(set, way)].clone(),
            };
        }

        if let Some(way) =
            (0..self.geometry.ways).find(|&way| !self.lines[self.slot(set, way)].is_valid())
        {
            return Lookup::Miss { way, victim: None };
        }

        let way = self.policy.victim(set) % self.geometry.ways;
        let line = self.lines[self.slot(set, way)].clone();
        let victim_addr = self.geometry.block_addr(set, line.tag());
        Lookup::Miss {
            way,
            victim: Some((victim_addr, line)),
        }
    }

    /// Stored line for a present block.
    pub fn get(&self, addr: BlockAddr) -> Option<&L> {
        let set = self.geometry.set_index(addr);
        self.find_way(addr).map(|way| &self.lines[self.slot(set, way)])
    }

    /// Mutable stored line for a present block; counts as a touch.
    pub fn get_mut(&mut self, addr: BlockAddr) -> Option<&mut L> {
        let set = self.geometry.set_index(addr);
        let way = self.find_way(addr)?;
        self.policy.touch(set, way);
        let slot = self.slot(set, way);
        Some(&mut self.lines[slot])
    }

    /// Writes `line` for `addr` into `way` of the address's set.
    pub fn write(&mut self, addr: BlockAddr, way: usize, mut line: L) {
        let set = self.geometry.set_index(addr);
        line.set_tag(self.geometry.tag(addr));
        let slot = self.slot(set, way);
        self.lines[slot] = line;
        self.policy.touch(set, way);
    }

    /// Frees `way` of the set `addr` maps to.
    pub fn invalidate(&mut self, addr: BlockAddr, way: usize) {
        let set = self.geometry.set_index(addr);
        let slot = self.slot(set, way);
        self.lines[slot] = L::default();
    }

    /// Removes a present block, returning its line.
    pub fn remove(&mut self, addr: BlockAddr) -> Option<L> {
        let set = self.geometry.set_index(addr);
        let way = self.find_way(addr)?;
        let slot = self.slot(set, way);
        Some(std::mem::take(&mut self.lines[slot]))
    }

    /// Frees every way.
    pub fn clear(&mut self) {
        self.lines.fill(L::default());
    }

    /// Iterates over every valid block with its address.
    pub fn iter_valid(&self) -> impl Iterator<Item = (BlockAddr, &L)> {
        let ways = self.geometry.ways;
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.is_valid())
            .map(move |(slot, line)| (self.geometry.block_addr(slot / ways, line.tag()), line))
    }
}
