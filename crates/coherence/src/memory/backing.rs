//! Backing store behind the home directory.

use std::collections::HashMap;

use tracing::trace;

use super::controller::MemoryController;
use crate::common::addr::{BlockAddr, LineData};

/// Completion of one backing store access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemCompletion {
    /// The access succeeded.
    pub ok: bool,
    /// Block read (reads) or written (writes).
    pub data: LineData,
}

/// Variable-latency block storage.
///
/// One access is in flight at a time. The caller starts it with `begin_read` or
/// `begin_write` and calls `poll` once per cycle until a completion appears.
pub trait BackingStore: Send {
    /// Starts reading `addr`.
    fn begin_read(&mut self, addr: BlockAddr);

    /// Starts writing `data` to `addr`.
    fn begin_write(&mut self, addr: BlockAddr, data: LineData);

    /// Advances the in-flight access by one cycle.
    ///
    /// # Returns
    ///
    /// The completion on the cycle the access finishes, otherwise `None`.
    fn poll(&mut self) -> Option<MemCompletion>;

    /// Drops any in-flight access without completing it.
    fn abort(&mut self);

    /// Current contents of `addr`, bypassing timing.
    fn peek(&self, addr: BlockAddr) -> LineData;
}

#[derive(Clone, Copy, Debug)]
enum Access {
    Read(BlockAddr),
    Write(BlockAddr, LineData),
}

/// Sparse block memory timed by a [`MemoryController`].
///
/// Blocks never written read as zero.
#[derive(Debug)]
pub struct MainMemory {
    blocks: HashMap<BlockAddr, LineData>,
    controller: Box<dyn MemoryController>,
    in_flight: Option<(Access, u64)>,
}

impl MainMemory {
    /// Creates an empty memory timed by `controller`.
    pub fn new(controller: Box<dyn MemoryController>) -> Self {
        Self {
            blocks: HashMap::new(),
            controller,
            in_flight: None,
        }
    }

    /// Stores `data` at `addr` without timing; used to seed workloads.
    pub fn preload(&mut self, addr: BlockAddr, data: LineData) {
        let _ = self.blocks.insert(addr, data);
    }
}

impl BackingStore for MainMemory {
    fn begin_read(&mut self, addr: BlockAddr) {
        let latency = self.controller.access_latency(addr.val());
        self.in_flight = Some((Access::Read(addr), latency));
    }

    fn begin_write(&mut self, addr: BlockAddr, data: LineData) {
        let latency = self.controller.access_latency(addr.val());
        self.in_flight = Some((Access::Write(addr, data), latency));
    }

    fn poll(&mut self) -> Option<MemCompletion> {
        let (access, remaining) = self.in_flight.as_mut()?;
        if *remaining > 0 {
            *remaining -= 1;
            return None;
        }
        let access = *access;
        let completion = match access {
            Access::Read(addr) => MemCompletion {
                ok: true,
                data: self.peek(addr),
            },
            Access::Write(addr, data) => {
                let _ = self.blocks.insert(addr, data);
                MemCompletion { ok: true, data }
            }
        };
        trace!(?access, "memory access complete");
        self.in_flight = None;
        Some(completion)
    }

    fn abort(&mut self) {
        self.in_flight = None;
    }

    fn peek(&self, addr: BlockAddr) -> LineData {
        self.blocks.get(&addr).copied().unwrap_or(0)
    }
}
