//! Sharer directory store.
//!
//! Maps each tracked block to `{valid, modified, tag, sharers}`. The MESI class
//! of an entry is not stored; [`DirectoryLine::class`] derives it from the
//! sharer count and the modified bit on every read.

use serde::Serialize;

use super::{Geometry, Lookup, SetAssociative, StoreLine};
use crate::common::addr::{BlockAddr, NodeId};
use crate::common::mesi::MesiState;
use crate::common::select::first_set_bit;
use crate::config::ReplacementPolicy;

/// Fixed-capacity list of sharer slots.
///
/// Empty slots are `None`, so no node id doubles as the empty marker.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SharerList {
    slots: Vec<Option<NodeId>>,
}

impl SharerList {
    /// Creates a list of `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied slots.
    pub fn count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Returns `true` when no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Returns `true` when no slot is free.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Node in slot `slot`.
    pub fn get(&self, slot: usize) -> Option<NodeId> {
        self.slots.get(slot).copied().flatten()
    }

    /// Lowest free slot.
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Lowest occupied slot.
    pub fn first_occupied(&self) -> Option<usize> {
        first_set_bit(self.occupied_mask())
    }

    /// Slot holding `node`.
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(node))
    }

    /// Returns `true` when `node` occupies a slot.
    pub fn contains(&self, node: NodeId) -> bool {
        self.position(node).is_some()
    }

    /// The only sharer, when exactly one slot is occupied.
    pub fn sole(&self) -> Option<NodeId> {
        let mut occupied = self.iter();
        match (occupied.next(), occupied.next()) {
            (Some((_, node)), None) => Some(node),
            _ => None,
        }
    }

    /// Adds `node` to the lowest free slot.
    ///
    /// # Returns
    ///
    /// The slot holding `node` (its existing slot when already present), or `None`
    /// when the list is full.
    pub fn insert(&mut self, node: NodeId) -> Option<usize> {
        if let Some(slot) = self.position(node) {
            return Some(slot);
        }
        let slot = self.first_free()?;
        self.slots[slot] = Some(node);
        Some(slot)
    }

    /// Places `node` in slot `slot` when that slot is free.
    ///
    /// # Returns
    ///
    /// `false` when the slot is out of range or occupied.
    pub fn insert_at(&mut self, slot: usize, node: NodeId) -> bool {
        match self.slots.get_mut(slot) {
            Some(s) if s.is_none() => {
                *s = Some(node);
                true
            }
            _ => false,
        }
    }

    /// Removes `node`, returning the slot it occupied.
    pub fn remove(&mut self, node: NodeId) -> Option<usize> {
        let slot = self.position(node)?;
        self.slots[slot] = None;
        Some(slot)
    }

    /// Empties slot `slot`.
    pub fn clear_slot(&mut self, slot: usize) {
        if let Some(s) = self.slots.get_mut(slot) {
            *s = None;
        }
    }

    /// Empties every slot.
    pub fn clear(&mut self) {
        self.slots.fill(None);
    }

    /// Bitmask with bit `i` set for every occupied slot `i`.
    pub fn occupied_mask(&self) -> u64 {
        self.iter().fold(0, |mask, (slot, _)| mask | (1 << slot))
    }

    /// Copy of this list with `node` removed.
    #[must_use]
    pub fn without(&self, node: NodeId) -> Self {
        let mut list = self.clone();
        let _ = list.remove(node);
        list
    }

    /// Occupied `(slot, node)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| s.map(|node| (slot, node)))
    }
}

/// One directory entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryLine {
    /// Entry holds a tracked block.
    pub valid: bool,
    /// The sole sharer may hold the block dirty.
    pub modified: bool,
    /// Tag of the tracked block.
    pub tag: u64,
    /// Nodes holding a copy.
    pub sharers: SharerList,
}

impl DirectoryLine {
    /// Creates a valid entry with no sharers.
    pub fn new(sharer_slots: usize) -> Self {
        Self {
            valid: true,
            modified: false,
            tag: 0,
            sharers: SharerList::new(sharer_slots),
        }
    }

    /// MESI class derived from `(sharers.count(), modified)`.
    pub fn class(&self) -> MesiState {
        MesiState::classify(self.sharers.count(), self.modified)
    }
}

impl StoreLine for DirectoryLine {
    fn is_valid(&self) -> bool {
        self.valid
    }

    fn tag(&self) -> u64 {
        self.tag
    }

    fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
    }
}

/// Result of a directory lookup.
pub type DirectoryLookup = Lookup<DirectoryLine>;

/// Home-node store of directory entries.
///
/// The engine reads through two access paths: the primary lookup of the block
/// being served and the second access a recall uses to re-read the victim.
#[derive(Debug)]
pub struct SharerDirectoryStore {
    inner: SetAssociative<DirectoryLine>,
    sharer_slots: usize,
    /// Primary-port accesses.
    pub port_a_accesses: u64,
    /// Second-port accesses.
    pub port_b_accesses: u64,
}

impl SharerDirectoryStore {
    /// Creates an empty directory.
    ///
    /// # Arguments
    ///
    /// * `geometry` - Sets, ways, and block size.
    /// * `policy` - Replacement policy for capacity misses.
    /// * `sharer_slots` - Sharer slots per entry.
    pub fn new(geometry: Geometry, policy: ReplacementPolicy, sharer_slots: usize) -> Self {
        Self {
            inner: SetAssociative::new(geometry, policy),
            sharer_slots,
            port_a_accesses: 0,
            port_b_accesses: 0,
        }
    }

    /// Shape of the store.
    pub const fn geometry(&self) -> Geometry {
        self.inner.geometry()
    }

    /// Sharer slots per entry.
    pub const fn sharer_slots(&self) -> usize {
        self.sharer_slots
    }

    /// Primary-port lookup.
    pub fn lookup(&mut self, addr: BlockAddr) -> DirectoryLookup {
        self.port_a_accesses += 1;
        self.inner.lookup(addr)
    }

    /// Second-port read of a present block.
    pub fn reread(&mut self, addr: BlockAddr) -> Option<DirectoryLine> {
        self.port_b_accesses += 1;
        self.inner.get(addr).cloned()
    }

    /// Entry for `addr`, if tracked.
    pub fn get(&self, addr: BlockAddr) -> Option<&DirectoryLine> {
        self.inner.get(addr)
    }

    /// Writes the entry for `addr` into `way`.
    pub fn write(&mut self, addr: BlockAddr, way: usize, line: DirectoryLine) {
        self.inner.write(addr, way, line);
    }

    /// Applies `update` to the entry for `addr` and frees its way once no sharer remains.
    ///
    /// # Returns
    ///
    /// `false` when `addr` is not tracked.
    pub fn update(&mut self, addr: BlockAddr, update: impl FnOnce(&mut DirectoryLine)) -> bool {
        let Some(line) = self.inner.get_mut(addr) else {
            return false;
        };
        update(line);
        if line.sharers.is_empty() {
            *line = DirectoryLine::default();
        }
        true
    }

    /// Frees `way` of the set `addr` maps to.
    pub fn invalidate(&mut self, addr: BlockAddr, way: usize) {
        self.inner.invalidate(addr, way);
    }

    /// Forgets every entry.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Tracked blocks and their entries.
    pub fn entries(&self) -> impl Iterator<Item = (BlockAddr, &DirectoryLine)> {
        self.inner.iter_valid()
    }
}
