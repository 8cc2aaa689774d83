//! Latency models for the backing store.
//!
//! This module provides:
//! 1. **SimpleController:** Fixed latency per access.
//! 2. **DramController:** Row-buffer-aware latency (CAS, RAS, precharge).

/// Reports how many cycles an access to a block takes.
pub trait MemoryController: Send + Sync + std::fmt::Debug {
    /// Returns the number of cycles required for an access to `addr`.
    ///
    /// # Arguments
    ///
    /// * `addr` - Block address being accessed (used for row-buffer modeling).
    fn access_latency(&mut self, addr: u64) -> u64;
}

/// Fixed-latency controller; every access takes the same number of cycles.
#[derive(Debug)]
pub struct SimpleController {
    latency: u64,
}

impl SimpleController {
    /// Creates a controller answering every access after `latency` cycles.
    pub const fn new(latency: u64) -> Self {
        Self { latency }
    }
}

impl MemoryController for SimpleController {
    fn access_latency(&mut self, _addr: u64) -> u64 {
        self.latency
    }
}

/// Row-buffer controller; models CAS, RAS, and precharge latencies.
#[derive(Debug)]
pub struct DramController {
    open_row: Option<u64>,
    t_cas: u64,
    t_ras: u64,
    t_pre: u64,
    row_mask: u64,
}

impl DramController {
    /// Creates a controller with no row open.
    ///
    /// # Arguments
    ///
    /// * `t_cas` - Column access strobe latency.
    /// * `t_ras` - Row access strobe latency.
    /// * `t_pre` - Precharge latency.
    pub const fn new(t_cas: u64, t_ras: u64, t_pre: u64) -> Self {
        Self {
            open_row: None,
            t_cas,
            t_ras,
            t_pre,
            row_mask: !2047,
        }
    }
}

impl MemoryController for DramController {
    fn access_latency(&mut self, addr: u64) -> u64 {
        let row = addr & self.row_mask;
        match self.open_row {
            Some(open) if open == row => self.t_cas,
            Some(_) => {
                self.open_row = Some(row);
                self.t_pre + self.t_ras + self.t_cas
            }
            None => {
                self.open_row = Some(row);
                self.t_ras + self.t_cas
            }
        }
    }
}
