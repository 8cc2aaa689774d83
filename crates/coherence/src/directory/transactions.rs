//! Active transaction table.
//!
//! A fixed-capacity slot map of in-flight transactions with an address index.
//! Both the request address and the probe target (which differs for a
//! capacity recall) are indexed, so a conflicting request to either is found
//! in one lookup.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::common::addr::{BlockAddr, NodeId};
use crate::common::select::{first_set_bit, round_robin};
use crate::protocol::{Message, Opcode};
use crate::store::directory::SharerList;

/// Slot index of a transaction in the [`ActiveTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TxnId(pub usize);

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn{}", self.0)
    }
}

/// Kind of probe a transaction sends to the sharers it waits on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Probe {
    /// Forward-share: the owner downgrades to Shared and stays a sharer.
    Forward,
    /// Invalidate: the sharer gives up its copy.
    Invalidate,
}

impl Probe {
    /// Wire opcode of this probe.
    pub const fn opcode(self) -> Opcode {
        match self {
            Self::Forward => Opcode::FwdGetS,
            Self::Invalidate => Opcode::Inv,
        }
    }
}

/// A request that could not complete in one pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transaction {
    /// The request being served; retried once every ack has arrived.
    pub request: Message,
    /// Block the probes refer to: the request address, or the victim of a recall.
    pub target: BlockAddr,
    /// Probe kind sent to the snapshot sharers.
    pub probe: Probe,
    /// Sharers of `target` at admission time; slots are cleared as they answer.
    pub snapshot: SharerList,
    /// Bit `i` set while snapshot slot `i` has not answered.
    pub pending: u64,
}

impl Transaction {
    /// Creates a transaction waiting on every occupied slot of `snapshot`.
    pub fn new(request: Message, target: BlockAddr, probe: Probe, snapshot: SharerList) -> Self {
        let pending = snapshot.occupied_mask();
        Self {
            request,
            target,
            probe,
            snapshot,
            pending,
        }
    }

    /// Returns `true` once every expected answer has arrived.
    pub const fn is_ready(&self) -> bool {
        self.pending == 0
    }

    /// Returns `true` when this is a capacity recall of another block.
    pub fn is_recall(&self) -> bool {
        self.target != self.request.addr
    }

    /// Snapshot slot of `node` while its answer is still pending.
    pub fn pending_slot(&self, node: NodeId) -> Option<usize> {
        self.snapshot
            .position(node)
            .filter(|&slot| self.pending & (1 << slot) != 0)
    }

    /// Records the answer of `node`.
    ///
    /// # Returns
    ///
    /// `false` when `node` was not pending.
    pub fn answer(&mut self, node: NodeId) -> bool {
        let Some(slot) = self.pending_slot(node) else {
            return false;
        };
        self.pending &= !(1 << slot);
        self.snapshot.clear_slot(slot);
        true
    }

    /// Probes still owed to pending sharers, lowest slot first.
    pub fn probes(&self) -> Vec<Message> {
        let mut mask = self.pending;
        let mut out = Vec::new();
        while let Some(slot) = first_set_bit(mask) {
            mask &= !(1 << slot);
            if let Some(node) = self.snapshot.get(slot) {
                out.push(self.probe_to(node));
            }
        }
        out
    }

    /// Probe message addressed to `node`.
    pub const fn probe_to(&self, node: NodeId) -> Message {
        Message::new(self.probe.opcode(), self.target, NodeId::DIRECTORY, node)
            .with_requestor(self.request.src)
    }
}

/// Bounded table of active transactions.
#[derive(Debug)]
pub struct ActiveTable {
    slots: Vec<Option<Transaction>>,
    index: HashMap<BlockAddr, TxnId>,
    cursor: usize,
    /// Most transactions ever live at once.
    pub high_water: usize,
}

impl ActiveTable {
    /// Creates an empty table of `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            index: HashMap::new(),
            cursor: 0,
            high_water: 0,
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of live transactions.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Returns `true` when no transaction is live.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Returns `true` when a new transaction can be admitted.
    pub fn has_free(&self) -> bool {
        self.slots.iter().any(Option::is_none)
    }

    /// Admits `txn` into the lowest free slot.
    ///
    /// # Errors
    ///
    /// Returns the transaction when the table is full or either of its addresses
    /// already belongs to a live transaction.
    pub fn admit(&mut self, txn: Transaction) -> Result<TxnId, Transaction> {
        if self.index.contains_key(&txn.request.addr) || self.index.contains_key(&txn.target) {
            return Err(txn);
        }
        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            return Err(txn);
        };
        let id = TxnId(slot);
        let _ = self.index.insert(txn.request.addr, id);
        let _ = self.index.insert(txn.target, id);
        self.slots[slot] = Some(txn);
        self.high_water = self.high_water.max(self.len());
        Ok(id)
    }

    /// Points a live transaction at a new probe round.
    ///
    /// Used when a drained transaction has to wait again (a hand-off followed by an
    /// invalidation, or a retry that hits another capacity miss).
    ///
    /// # Returns
    ///
    /// `false` when `id` is not live or `target` belongs to another transaction.
    pub fn rearm(&mut self, id: TxnId, target: BlockAddr, probe: Probe, snapshot: SharerList) -> bool {
        if self.index.get(&target).is_some_and(|&owner| owner != id) {
            return false;
        }
        let Some(txn) = self.slots.get_mut(id.0).and_then(Option::as_mut) else {
            return false;
        };
        if txn.target != txn.request.addr {
            let _ = self.index.remove(&txn.target);
        }
        let request = txn.request;
        *txn = Transaction::new(request, target, probe, snapshot);
        let _ = self.index.insert(target, id);
        true
    }

    /// Removes a transaction and its index entries.
    pub fn retire(&mut self, id: TxnId) -> Option<Transaction> {
        let txn = self.slots.get_mut(id.0)?.take()?;
        let _ = self.index.remove(&txn.request.addr);
        let _ = self.index.remove(&txn.target);
        Some(txn)
    }

    /// Live transaction owning `addr` as request address or probe target.
    pub fn find(&self, addr: BlockAddr) -> Option<TxnId> {
        self.index.get(&addr).copied()
    }

    /// Live transaction whose probes of `addr` still wait on `node`.
    pub fn waiting_on(&self, addr: BlockAddr, node: NodeId) -> Option<TxnId> {
        let id = self.find(addr)?;
        let txn = self.get(id)?;
        (txn.target == addr && txn.pending_slot(node).is_some()).then_some(id)
    }

    /// Transaction in slot `id`.
    pub fn get(&self, id: TxnId) -> Option<&Transaction> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    /// Mutable transaction in slot `id`.
    pub fn get_mut(&mut self, id: TxnId) -> Option<&mut Transaction> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Picks the next ready transaction, round-robin from the last grant.
    pub fn next_ready(&mut self) -> Option<TxnId> {
        let slots = &self.slots;
        let slot = round_robin(self.cursor, slots.len(), |i| {
            slots[i].as_ref().is_some_and(Transaction::is_ready)
        })?;
        self.cursor = (slot + 1) % self.slots.len();
        Some(TxnId(slot))
    }

    /// Live transactions with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (TxnId, &Transaction)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, txn)| txn.as_ref().map(|t| (TxnId(slot), t)))
    }

    /// Drops every transaction.
    pub fn clear(&mut self) {
        self.slots.fill(None);
        self.index.clear();
        self.cursor = 0;
    }
}
