//! Memory port adapter between the directory FSM and the backing store.
//!
//! A small FSM of its own: `Idle -> Reading | Writing -> WaitForClear -> Idle`.
//! The directory issues an access and keeps running its own state machine; it
//! polls [`MemoryPort::completion`] and calls [`MemoryPort::clear`] once it has
//! consumed the result, which is the only way back to `Idle`.

use std::fmt;

use tracing::trace;

use super::backing::{BackingStore, MemCompletion};
use crate::common::addr::{BlockAddr, LineData};

/// State of the port's sub-FSM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortState {
    /// Ready to accept an access.
    Idle,
    /// Read in flight.
    Reading,
    /// Write in flight.
    Writing,
    /// Completion latched; waiting for the engine to clear it.
    WaitForClear,
}

/// Decouples one requester from a variable-latency [`BackingStore`].
pub struct MemoryPort {
    state: PortState,
    backing: Box<dyn BackingStore>,
    latched: Option<MemCompletion>,
}

impl fmt::Debug for MemoryPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPort")
            .field("state", &self.state)
            .field("latched", &self.latched)
            .finish_non_exhaustive()
    }
}

impl MemoryPort {
    /// Wraps `backing` in an idle port.
    pub fn new(backing: Box<dyn BackingStore>) -> Self {
        Self {
            state: PortState::Idle,
            backing,
            latched: None,
        }
    }

    /// Current sub-FSM state.
    pub const fn state(&self) -> PortState {
        self.state
    }

    /// Starts a read.
    ///
    /// # Returns
    ///
    /// `false` when the port is not idle; nothing is issued.
    pub fn issue_read(&mut self, addr: BlockAddr) -> bool {
        if self.state != PortState::Idle {
            return false;
        }
        trace!(%addr, "memory port read");
        self.backing.begin_read(addr);
        self.state = PortState::Reading;
        true
    }

    /// Starts a write.
    ///
    /// # Returns
    ///
    /// `false` when the port is not idle; nothing is issued.
    pub fn issue_write(&mut self, addr: BlockAddr, data: LineData) -> bool {
        if self.state != PortState::Idle {
            return false;
        }
        trace!(%addr, data, "memory port write");
        self.backing.begin_write(addr, data);
        self.state = PortState::Writing;
        true
    }

    /// Advances the in-flight access by one cycle.
    pub fn tick(&mut self) {
        if matches!(self.state, PortState::Reading | PortState::Writing) {
            if let Some(completion) = self.backing.poll() {
                self.latched = Some(completion);
                self.state = PortState::WaitForClear;
            }
        }
    }

    /// Latched completion, if the access has finished.
    pub const fn completion(&self) -> Option<MemCompletion> {
        self.latched
    }

    /// Releases the latched completion so the port accepts a new access.
    pub fn clear(&mut self) {
        if self.state == PortState::WaitForClear {
            self.latched = None;
            self.state = PortState::Idle;
        }
    }

    /// Abandons any access and returns to `Idle`.
    pub fn reset(&mut self) {
        self.backing.abort();
        self.latched = None;
        self.state = PortState::Idle;
    }

    /// The wrapped backing store.
    pub fn backing(&self) -> &dyn BackingStore {
        self.backing.as_ref()
    }
}
