//! Backing store access for the home directory.
//!
//! This module provides:
//! 1. **Controllers:** Latency models (fixed, or DRAM row-buffer aware).
//! 2. **Backing store:** The [`BackingStore`] interface and a sparse [`MainMemory`].
//! 3. **Port:** The [`MemoryPort`] adapter FSM the directory drives.

/// Backing store interface and sparse main memory.
pub mod backing;

/// Latency controllers.
pub mod controller;

/// Memory port adapter FSM.
pub mod port;

pub use backing::{BackingStore, MainMemory, MemCompletion};
pub use controller::{DramController, MemoryController, SimpleController};
pub use port::{MemoryPort, PortState};

use crate::config::{MemoryConfig, MemoryController as ControllerType};

/// Builds the latency controller selected by `config`.
pub fn build_controller(config: &MemoryConfig) -> Box<dyn MemoryController> {
    match config.controller {
        ControllerType::Simple => Box::new(SimpleController::new(config.latency)),
        ControllerType::Dram => Box::new(DramController::new(
            config.t_cas,
            config.t_ras,
            config.t_pre,
        )),
    }
}
