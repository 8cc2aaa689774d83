//! Line cache store held at each cache node.
//!
//! The responder uses the protocol port (installs, forwards, invalidations);
//! the node's own controller uses the local port for load/store hits.

use serde::Serialize;

use super::{Geometry, Lookup, SetAssociative, StoreLine};
use crate::common::addr::{BlockAddr, LineData};
use crate::common::mesi::MesiState;
use crate::config::ReplacementPolicy;

/// One cached block at a node.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheLine {
    /// Coherence state; `Invalid` means the way is free.
    pub state: MesiState,
    /// Data differs from the backing store.
    pub dirty: bool,
    /// An upper cache level also holds this block.
    pub inclusion: bool,
    /// Tag of the held block.
    pub tag: u64,
    /// Block payload.
    pub data: LineData,
}

impl CacheLine {
    /// Creates a line in `state` holding `data`.
    pub fn new(state: MesiState, data: LineData, inclusion: bool) -> Self {
        Self {
            state,
            dirty: state == MesiState::Modified,
            inclusion,
            tag: 0,
            data,
        }
    }

    /// Returns `true` when the line must be written back before it is dropped.
    pub fn needs_writeback(&self) -> bool {
        self.dirty || self.state == MesiState::Modified
    }
}

impl StoreLine for CacheLine {
    fn is_valid(&self) -> bool {
        self.state.is_valid()
    }

    fn tag(&self) -> u64 {
        self.tag
    }

    fn set_tag(&mut self, tag: u64) {
        self.tag = tag;
    }
}

/// Node-local store of cached blocks.
#[derive(Debug)]
pub struct LineCacheStore {
    inner: SetAssociative<CacheLine>,
}

impl LineCacheStore {
    /// Creates an empty store.
    pub fn new(geometry: Geometry, policy: ReplacementPolicy) -> Self {
        Self {
            inner: SetAssociative::new(geometry, policy),
        }
    }

    /// Shape of the store.
    pub const fn geometry(&self) -> Geometry {
        self.inner.geometry()
    }

    /// Line for `addr`, if present.
    pub fn get(&self, addr: BlockAddr) -> Option<&CacheLine> {
        self.inner.get(addr)
    }

    /// Mutable line for `addr`, if present.
    pub fn get_mut(&mut self, addr: BlockAddr) -> Option<&mut CacheLine> {
        self.inner.get_mut(addr)
    }

    /// Installs or overwrites the line for `addr`.
    ///
    /// # Returns
    ///
    /// The displaced block when the set was full and a different block had to leave.
    pub fn install(&mut self, addr: BlockAddr, line: CacheLine) -> Option<(BlockAddr, CacheLine)> {
        match self.inner.lookup(addr) {
            Lookup::Hit { way, .. } => {
                self.inner.write(addr, way, line);
                None
            }
            Lookup::Miss { way, victim } => {
                self.inner.write(addr, way, line);
                victim
            }
        }
    }

    /// Removes the line for `addr`.
    ///
    /// # Returns
    ///
    /// The removed line, or `None` when it was not present.
    pub fn remove(&mut self, addr: BlockAddr) -> Option<CacheLine> {
        self.inner.remove(addr)
    }

    /// Drops every line.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Present blocks and their lines.
    pub fn lines(&self) -> impl Iterator<Item = (BlockAddr, &CacheLine)> {
        self.inner.iter_valid()
    }
}
