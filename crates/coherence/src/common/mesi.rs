//! MESI coherence states.

use serde::{Deserialize, Serialize};

/// The four coherence states of a block.
///
/// Used both for a node's local line state and for the aggregate class of a
/// directory entry. Compatibility between copies held by different nodes:
///
/// ```text
///   M E S I
/// M ✗ ✗ ✗ ✓
/// E ✗ ✗ ✗ ✓
/// S ✗ ✗ ✓ ✓
/// I ✓ ✓ ✓ ✓
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MesiState {
    /// Dirty, sole owner.
    Modified,
    /// Clean, sole owner.
    Exclusive,
    /// Clean, possibly several holders.
    Shared,
    /// No valid copy.
    #[default]
    Invalid,
}

impl MesiState {
    /// Derives the directory class of an entry from its sharer count and modified bit.
    ///
    /// The class is never stored; every reader recomputes it from these two values.
    ///
    /// # Arguments
    ///
    /// * `count` - Number of occupied sharer slots.
    /// * `modified` - The entry's modified bit.
    pub const fn classify(count: usize, modified: bool) -> Self {
        match count {
            0 => Self::Invalid,
            1 if modified => Self::Modified,
            1 => Self::Exclusive,
            _ => Self::Shared,
        }
    }

    /// Returns `true` when a holder of this state may write without asking the directory.
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Modified | Self::Exclusive)
    }

    /// Returns `true` for any state other than `Invalid`.
    pub const fn is_valid(self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Single-letter mnemonic used in traces and reports.
    pub const fn letter(self) -> char {
        match self {
            Self::Modified => 'M',
            Self::Exclusive => 'E',
            Self::Shared => 'S',
            Self::Invalid => 'I',
        }
    }
}
