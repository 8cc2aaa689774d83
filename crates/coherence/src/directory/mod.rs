//! Directory coherence engine.
//!
//! The home-node state machine. It owns the sharer directory, the active
//! transaction table, and the memory port, and it decides for every request
//! whether to grant, forward, recall, or reject. It provides:
//! 1. **Admission:** Responses first, then a ready transaction, then a fresh request;
//!    a fresh request to a busy block is rejected with `NackB`.
//! 2. **Request handling:** Grants from the backing store, forward-share hand-offs,
//!    invalidation rounds for ownership and full sharer lists, and capacity recalls.
//! 3. **Response handling:** Acks, dirty writebacks, and `NackC` probe retries.
//!
//! The engine makes exactly one state transition per [`DirectoryEngine::tick`].

/// Active transaction table.
pub mod transactions;

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use self::transactions::{ActiveTable, Probe, Transaction, TxnId};
use crate::channel::MessageChannel;
use crate::common::addr::{BlockAddr, LineData, NodeId};
use crate::common::error::CoherenceError;
use crate::common::mesi::MesiState;
use crate::config::Config;
use crate::memory::{BackingStore, MainMemory, MemoryPort, PortState, build_controller};
use crate::protocol::{Message, Opcode, OpcodeGroup};
use crate::stats::DirectoryStats;
use crate::store::{Geometry, Lookup};
use crate::store::directory::{DirectoryLine, DirectoryLookup, SharerDirectoryStore, SharerList};

/// States of the directory engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirState {
    /// Clears all state, then enters `Idle`.
    Reset,
    /// Waiting for work.
    Idle,
    /// Splits the work address into set and tag.
    AddressDirectory,
    /// Reads the directory entry.
    ReadDirectory,
    /// Applies a sharer's answer to the transaction waiting on it.
    HandleResponse,
    /// Waits for the block to arrive from the backing store.
    ReadBackingStore,
    /// Decides how to serve a request.
    HandleRequest,
    /// Installs the directory entry and sends the grant.
    CheckBackingStoreResult,
    /// Prepares the invalidation round of a transaction.
    StartRecall,
    /// Re-reads the victim entry of a capacity recall on the second port.
    SecondDirectoryAccess,
    /// Sends one probe per cycle.
    SendRecall,
    /// Waits for dirty data to reach the backing store.
    WriteBackingStore,
    /// Drains latched outbound messages into the channel.
    WaitInterface,
}

/// Grant prepared by `HandleRequest` and completed once memory data arrives.
#[derive(Clone, Debug)]
struct Grant {
    opcode: Opcode,
    way: usize,
    line: DirectoryLine,
}

/// Context of the message being worked on.
#[derive(Clone, Debug)]
struct Work {
    msg: Message,
    active: Option<TxnId>,
    lookup: Option<DirectoryLookup>,
    grant: Option<Grant>,
    txn: Option<TxnId>,
    fill: Option<LineData>,
    writeback: Option<(BlockAddr, LineData)>,
    reply: Option<Message>,
}

impl Work {
    const fn new(msg: Message, active: Option<TxnId>) -> Self {
        Self {
            msg,
            active,
            lookup: None,
            grant: None,
            txn: active,
            fill: None,
            writeback: None,
            reply: None,
        }
    }
}

/// Home-node coherence engine.
///
/// # Examples
///
/// ```
/// use coherence_core::channel::{MessageChannel, Role};
/// use coherence_core::common::{BlockAddr, NodeId};
/// use coherence_core::config::Config;
/// use coherence_core::directory::DirectoryEngine;
/// use coherence_core::protocol::{Message, Opcode};
///
/// let mut config = Config::default();
/// config.memory.latency = 0;
/// let mut engine = DirectoryEngine::new(&config);
/// let mut channel = MessageChannel::new(Role::Directory, NodeId::DIRECTORY, 4, 4, 4);
///
/// let req = Message::new(Opcode::GetS, BlockAddr(0x100), NodeId(3), NodeId::DIRECTORY);
/// let _ = channel.accept(req);
///
/// let mut grant = None;
/// for _ in 0..32 {
///     engine.tick(&mut channel);
///     if let Some(msg) = channel.pop_outbound() {
///         grant = Some(msg);
///         break;
///     }
/// }
/// assert_eq!(grant.map(|m| m.opcode), Some(Opcode::Data));
/// ```
#[derive(Debug)]
pub struct DirectoryEngine {
    state: DirState,
    store: SharerDirectoryStore,
    table: ActiveTable,
    memory: MemoryPort,
    work: Option<Work>,
    outgoing: VecDeque<Message>,
    probes: VecDeque<Message>,
    /// Activity counters.
    pub stats: DirectoryStats,
}

impl DirectoryEngine {
    /// Creates an engine backed by a [`MainMemory`] timed per `config.memory`.
    pub fn new(config: &Config) -> Self {
        let memory = MainMemory::new(build_controller(&config.memory));
        Self::with_backing(config, Box::new(memory))
    }

    /// Creates an engine over an arbitrary backing store.
    ///
    /// # Arguments
    ///
    /// * `config` - Directory geometry, sharer slots, and table capacity.
    /// * `backing` - Store the memory port reads from and writes to.
    pub fn with_backing(config: &Config, backing: Box<dyn BackingStore>) -> Self {
        let geometry = Geometry {
            sets: config.directory.sets,
            ways: config.directory.ways,
            line_bytes: config.general.line_bytes,
        };
        Self {
            state: DirState::Reset,
            store: SharerDirectoryStore::new(
                geometry,
                config.directory.policy,
                config.protocol.sharer_slots(),
            ),
            table: ActiveTable::new(config.protocol.active_reqs),
            memory: MemoryPort::new(backing),
            work: None,
            outgoing: VecDeque::new(),
            probes: VecDeque::new(),
            stats: DirectoryStats::default(),
        }
    }

    /// Current state.
    pub const fn state(&self) -> DirState {
        self.state
    }

    /// The sharer directory.
    pub const fn store(&self) -> &SharerDirectoryStore {
        &self.store
    }

    /// The active transaction table.
    pub const fn table(&self) -> &ActiveTable {
        &self.table
    }

    /// The memory port and its backing store.
    pub const fn memory(&self) -> &MemoryPort {
        &self.memory
    }

    /// Returns `true` when the engine is idle with no live transaction.
    pub fn is_idle(&self) -> bool {
        self.state == DirState::Idle && self.table.is_empty() && self.outgoing.is_empty()
    }

    /// Schedules a destructive reset for the next tick.
    pub fn reset(&mut self) {
        self.state = DirState::Reset;
    }

    /// Advances the engine by one cycle.
    pub fn tick(&mut self, channel: &mut MessageChannel) {
        self.memory.tick();
        if self.state != DirState::Idle {
            self.stats.busy_cycles += 1;
        }

        let next = match self.state {
            DirState::Reset => self.do_reset(),
            DirState::Idle => self.idle(channel),
            DirState::AddressDirectory => self.address_directory(),
            DirState::ReadDirectory => self.read_directory(),
            DirState::HandleResponse => self.handle_response(),
            DirState::HandleRequest => self.handle_request(),
            DirState::ReadBackingStore => self.read_backing_store(),
            DirState::CheckBackingStoreResult => self.check_backing_store_result(),
            DirState::StartRecall => self.start_recall(),
            DirState::SecondDirectoryAccess => self.second_directory_access(),
            DirState::SendRecall => self.send_recall(channel),
            DirState::WriteBackingStore => self.write_backing_store(),
            DirState::WaitInterface => self.wait_interface(channel),
        };

        if next != self.state {
            trace!(from = ?self.state, to = ?next, "directory transition");
        }
        self.state = next;
    }

    fn do_reset(&mut self) -> DirState {
        debug!("directory reset");
        self.store.clear();
        self.table.clear();
        self.memory.reset();
        self.work = None;
        self.outgoing.clear();
        self.probes.clear();
        DirState::Idle
    }

    fn idle(&mut self, channel: &mut MessageChannel) -> DirState {
        self.work = None;

        if let Some(msg) = channel.pop_response() {
            self.stats.responses += 1;
            self.work = Some(Work::new(msg, None));
            return DirState::AddressDirectory;
        }

        if let Some(id) = self.table.next_ready() {
            if let Some(txn) = self.table.get(id) {
                trace!(%id, msg = %txn.request, "draining ready transaction");
                self.stats.requests += 1;
                self.work = Some(Work::new(txn.request, Some(id)));
                return DirState::AddressDirectory;
            }
        }

        let Some(msg) = channel.pop_request() else {
            return DirState::Idle;
        };
        self.stats.requests += 1;

        if self.table.find(msg.addr).is_some() && !self.is_exempt_writeback(&msg) {
            debug!(%msg, "block has a live transaction");
            return self.reject(msg);
        }
        self.work = Some(Work::new(msg, None));
        DirState::AddressDirectory
    }

    /// A writeback from a sharer the live transaction on its block is waiting on.
    fn is_exempt_writeback(&self, msg: &Message) -> bool {
        matches!(msg.opcode, Opcode::PutM | Opcode::PutS)
            && self.table.waiting_on(msg.addr, msg.src).is_some()
    }

    fn address_directory(&self) -> DirState {
        if let Some(work) = &self.work {
            let geometry = self.store.geometry();
            trace!(
                addr = %work.msg.addr,
                set = geometry.set_index(work.msg.addr),
                tag = geometry.tag(work.msg.addr),
                "addressing directory"
            );
        }
        DirState::ReadDirectory
    }

    fn read_directory(&mut self) -> DirState {
        let Some(work) = self.work.as_mut() else {
            return DirState::Idle;
        };
        if work.msg.opcode.group() == OpcodeGroup::Response {
            return DirState::HandleResponse;
        }
        work.lookup = Some(self.store.lookup(work.msg.addr));
        DirState::HandleRequest
    }

    fn handle_request(&mut self) -> DirState {
        let Some(work) = self.work.as_ref() else {
            return DirState::Idle;
        };
        let (msg, active) = (work.msg, work.active);
        let Some(lookup) = work.lookup.clone() else {
            return DirState::Idle;
        };

        match msg.opcode {
            Opcode::PutM | Opcode::PutS => self.handle_put(msg, &lookup),
            Opcode::GetS | Opcode::GetM => self.handle_get(msg, active, lookup),
            _ => {
                warn!(%msg, "unexpected request opcode");
                self.stats.dropped += 1;
                DirState::Idle
            }
        }
    }

    fn handle_put(&mut self, msg: Message, lookup: &DirectoryLookup) -> DirState {
        let ack = msg.reply(Opcode::PutAck);
        let tracked = matches!(lookup, Lookup::Hit { line, .. } if line.sharers.contains(msg.src));
        if !tracked {
            debug!(%msg, "stale writeback from non-sharer");
            return self.emit(ack);
        }

        if let Some(id) = self.table.waiting_on(msg.addr, msg.src) {
            if let Some(txn) = self.table.get_mut(id) {
                let _ = txn.answer(msg.src);
                trace!(%id, pending = txn.pending, "writeback satisfies transaction");
            }
        }
        let _ = self.store.update(msg.addr, |line| {
            let _ = line.sharers.remove(msg.src);
            line.modified = false;
        });

        if msg.opcode == Opcode::PutM {
            if let Some(work) = self.work.as_mut() {
                work.writeback = Some((msg.addr, msg.data));
                work.reply = Some(ack);
            }
            return DirState::WriteBackingStore;
        }
        self.emit(ack)
    }

    fn handle_get(&mut self, msg: Message, active: Option<TxnId>, lookup: DirectoryLookup) -> DirState {
        let requester = msg.src;
        let (way, line) = match lookup {
            Lookup::Hit { way, line } => (way, line),
            Lookup::Miss { way, victim: None } => (way, DirectoryLine::new(self.store.sharer_slots())),
            Lookup::Miss {
                victim: Some((victim, victim_line)),
                ..
            } => return self.start_capacity_recall(msg, active, victim, victim_line.sharers),
        };

        if msg.opcode == Opcode::GetM {
            let others = line.sharers.without(requester);
            if others.is_empty() {
                let mut granted = DirectoryLine::new(self.store.sharer_slots());
                let _ = granted.sharers.insert(requester);
                granted.modified = true;
                return self.prepare_grant(Opcode::Data, way, granted);
            }
            return match self.wait_on(msg, active, msg.addr, Probe::Invalidate, others) {
                Ok(_) => DirState::StartRecall,
                Err(next) => next,
            };
        }

        let class = line.class();
        if class.is_writable() && active.is_none() {
            if let Some(owner) = line.sharers.sole().filter(|&o| o != requester) {
                return match self.wait_on(msg, active, msg.addr, Probe::Forward, line.sharers.clone()) {
                    Ok(id) => {
                        let fwd = self.table.get(id).map(|txn| txn.probe_to(owner));
                        debug!(%msg, %owner, "forwarding to owner");
                        fwd.map_or(DirState::Idle, |fwd| self.emit(fwd))
                    }
                    Err(next) => next,
                };
            }
        }

        if line.sharers.contains(requester) || !line.sharers.is_full() {
            let opcode = if class == MesiState::Invalid {
                Opcode::Data
            } else {
                Opcode::DataS
            };
            let mut granted = line;
            granted.valid = true;
            granted.modified = false;
            let _ = granted.sharers.insert(requester);
            return self.prepare_grant(opcode, way, granted);
        }

        // Full sharer list: make room by invalidating the lowest occupied slot.
        let Some(slot) = line.sharers.first_occupied() else {
            return DirState::Idle;
        };
        let mut snapshot = SharerList::new(line.sharers.capacity());
        if let Some(victim) = line.sharers.get(slot) {
            let _ = snapshot.insert_at(slot, victim);
        }
        match self.wait_on(msg, active, msg.addr, Probe::Invalidate, snapshot) {
            Ok(_) => DirState::StartRecall,
            Err(next) => next,
        }
    }

    fn start_capacity_recall(
        &mut self,
        msg: Message,
        active: Option<TxnId>,
        victim: BlockAddr,
        sharers: SharerList,
    ) -> DirState {
        if self.table.find(victim).is_some_and(|owner| Some(owner) != active) {
            if active.is_some() {
                debug!(%msg, %victim, "victim busy, deferring");
                self.stats.deferrals += 1;
                return DirState::Idle;
            }
            debug!(%msg, %victim, "victim busy");
            return self.reject(msg);
        }
        match self.wait_on(msg, active, victim, Probe::Invalidate, sharers) {
            Ok(id) => {
                debug!(%msg, %victim, %id, "capacity recall");
                self.stats.recalls += 1;
                DirState::SecondDirectoryAccess
            }
            Err(next) => next,
        }
    }

    /// Admits a new transaction, or re-arms the drained one being served.
    ///
    /// # Errors
    ///
    /// Returns the state to enter instead: `WaitInterface` after a `NackB` for a
    /// fresh request, `Idle` when a drained transaction has to be deferred.
    fn wait_on(
        &mut self,
        msg: Message,
        active: Option<TxnId>,
        target: BlockAddr,
        probe: Probe,
        snapshot: SharerList,
    ) -> Result<TxnId, DirState> {
        let id = if let Some(id) = active {
            if !self.table.rearm(id, target, probe, snapshot) {
                self.stats.deferrals += 1;
                return Err(DirState::Idle);
            }
            id
        } else {
            match self.table.admit(Transaction::new(msg, target, probe, snapshot)) {
                Ok(id) => {
                    self.stats.admitted += 1;
                    id
                }
                Err(_) => {
                    debug!(%msg, "active table full");
                    return Err(self.reject(msg));
                }
            }
        };
        if let Some(work) = self.work.as_mut() {
            work.txn = Some(id);
        }
        Ok(id)
    }

    fn prepare_grant(&mut self, opcode: Opcode, way: usize, line: DirectoryLine) -> DirState {
        let Some(work) = self.work.as_mut() else {
            return DirState::Idle;
        };
        work.grant = Some(Grant { opcode, way, line });
        DirState::ReadBackingStore
    }

    fn read_backing_store(&mut self) -> DirState {
        let Some(addr) = self.work.as_ref().map(|w| w.msg.addr) else {
            return DirState::Idle;
        };
        match self.memory.state() {
            PortState::Idle => {
                if self.memory.issue_read(addr) {
                    self.stats.memory_reads += 1;
                }
                DirState::ReadBackingStore
            }
            PortState::WaitForClear => {
                let completion = self.memory.completion();
                self.memory.clear();
                match completion {
                    Some(c) if c.ok => {
                        if let Some(work) = self.work.as_mut() {
                            work.fill = Some(c.data);
                        }
                        DirState::CheckBackingStoreResult
                    }
                    _ => {
                        warn!(%addr, "backing store read failed, reissuing");
                        DirState::ReadBackingStore
                    }
                }
            }
            PortState::Reading | PortState::Writing => DirState::ReadBackingStore,
        }
    }

    fn check_backing_store_result(&mut self) -> DirState {
        let Some(work) = self.work.take() else {
            return DirState::Idle;
        };
        let (Some(grant), Some(data)) = (work.grant, work.fill) else {
            return DirState::Idle;
        };
        let (addr, requester) = (work.msg.addr, work.msg.src);

        self.store.write(addr, grant.way, grant.line);
        if let Some(id) = work.active {
            let _ = self.table.retire(id);
            trace!(%id, "transaction retired");
        }
        debug!(%addr, %requester, opcode = %grant.opcode, "grant");
        let reply = Message::new(grant.opcode, addr, NodeId::DIRECTORY, requester).with_data(data);
        self.emit(reply)
    }

    fn start_recall(&mut self) -> DirState {
        self.load_probes();
        DirState::SendRecall
    }

    fn second_directory_access(&mut self) -> DirState {
        if let Some(target) = self.current_txn().map(|txn| txn.target) {
            let line = self.store.reread(target);
            trace!(%target, sharers = line.map_or(0, |l| l.sharers.count()), "victim re-read");
        }
        self.load_probes();
        DirState::SendRecall
    }

    fn current_txn(&self) -> Option<&Transaction> {
        self.work
            .as_ref()
            .and_then(|w| w.txn)
            .and_then(|id| self.table.get(id))
    }

    fn load_probes(&mut self) {
        let probes = self.current_txn().map(Transaction::probes).unwrap_or_default();
        self.probes.extend(probes);
    }

    fn send_recall(&mut self, channel: &mut MessageChannel) -> DirState {
        let Some(probe) = self.probes.pop_front() else {
            return DirState::Idle;
        };
        if let Err(probe) = channel.send(probe) {
            self.probes.push_front(probe);
            return DirState::SendRecall;
        }
        trace!(%probe, "probe sent");
        self.record(probe.opcode);
        if self.probes.is_empty() {
            DirState::Idle
        } else {
            DirState::SendRecall
        }
    }

    fn write_backing_store(&mut self) -> DirState {
        let Some((addr, data)) = self.work.as_ref().and_then(|w| w.writeback) else {
            return DirState::Idle;
        };
        match self.memory.state() {
            PortState::Idle => {
                if self.memory.issue_write(addr, data) {
                    self.stats.memory_writes += 1;
                }
                DirState::WriteBackingStore
            }
            PortState::WaitForClear => {
                let ok = self.memory.completion().is_some_and(|c| c.ok);
                self.memory.clear();
                if !ok {
                    warn!(%addr, "backing store write failed, reissuing");
                    return DirState::WriteBackingStore;
                }
                match self.work.as_mut().and_then(|w| w.reply.take()) {
                    Some(reply) => self.emit(reply),
                    None => DirState::Idle,
                }
            }
            PortState::Reading | PortState::Writing => DirState::WriteBackingStore,
        }
    }

    fn handle_response(&mut self) -> DirState {
        let Some(msg) = self.work.as_ref().map(|w| w.msg) else {
            return DirState::Idle;
        };
        let Some(id) = self.table.waiting_on(msg.addr, msg.src) else {
            warn!(%msg, "dropping response nobody is waiting on");
            self.stats.dropped += 1;
            return DirState::Idle;
        };
        let Some(txn) = self.table.get_mut(id) else {
            return DirState::Idle;
        };
        let probe = txn.probe;

        match msg.opcode {
            Opcode::PutE => {
                let _ = txn.answer(msg.src);
                txn.pending = 0;
                self.settle_sharer(msg.addr, msg.src, probe);
                DirState::Idle
            }
            Opcode::InvAck | Opcode::NackD => {
                let _ = txn.answer(msg.src);
                trace!(%id, pending = txn.pending, %msg, "ack");
                let _ = self.store.update(msg.addr, |line| {
                    let _ = line.sharers.remove(msg.src);
                });
                DirState::Idle
            }
            Opcode::RespPutM => {
                let _ = txn.answer(msg.src);
                self.settle_sharer(msg.addr, msg.src, probe);
                if let Some(work) = self.work.as_mut() {
                    work.writeback = Some((msg.addr, msg.data));
                }
                DirState::WriteBackingStore
            }
            Opcode::NackC => {
                let again = txn.probe_to(msg.src);
                debug!(%again, "probe rejected, resending");
                self.stats.probe_retries += 1;
                self.emit(again)
            }
            _ => {
                warn!(%msg, "unexpected response opcode");
                self.stats.dropped += 1;
                DirState::Idle
            }
        }
    }

    /// Updates the directory after `node` answered a probe with data or a hand-off.
    ///
    /// A forward leaves the owner as a clean sharer; an invalidation removes it.
    fn settle_sharer(&mut self, addr: BlockAddr, node: NodeId, probe: Probe) {
        let _ = self.store.update(addr, |line| {
            line.modified = false;
            if probe == Probe::Invalidate {
                let _ = line.sharers.remove(node);
            }
        });
    }

    fn reject(&mut self, msg: Message) -> DirState {
        self.emit(msg.reply(Opcode::NackB))
    }

    fn emit(&mut self, msg: Message) -> DirState {
        self.record(msg.opcode);
        self.outgoing.push_back(msg);
        DirState::WaitInterface
    }

    fn record(&mut self, opcode: Opcode) {
        let counter = match opcode {
            Opcode::Data => &mut self.stats.grants_exclusive,
            Opcode::DataS => &mut self.stats.grants_shared,
            Opcode::PutAck => &mut self.stats.put_acks,
            Opcode::FwdGetS => &mut self.stats.forwards,
            Opcode::Inv => &mut self.stats.invalidations,
            Opcode::NackB => &mut self.stats.nacks,
            _ => return,
        };
        *counter += 1;
    }

    fn wait_interface(&mut self, channel: &mut MessageChannel) -> DirState {
        while let Some(&msg) = self.outgoing.front() {
            if channel.send(msg).is_err() {
                return DirState::WaitInterface;
            }
            trace!(%msg, "sent");
            let _ = self.outgoing.pop_front();
        }
        DirState::Idle
    }

    /// Checks the bookkeeping invariants of the directory and the active table.
    ///
    /// # Errors
    ///
    /// Returns [`CoherenceError::Invariant`] naming the first inconsistent block.
    pub fn check_invariants(&self) -> Result<(), CoherenceError> {
        for (addr, line) in self.store.entries() {
            let count = line.sharers.count();
            if count == 0 {
                return Err(invariant(addr, "valid entry without sharers"));
            }
            if line.modified && count != 1 {
                return Err(invariant(addr, format!("modified entry with {count} sharers")));
            }
            if line.sharers.iter().any(|(_, n)| n.is_directory()) {
                return Err(invariant(addr, "directory id recorded as sharer"));
            }
            let mut seen: Vec<NodeId> = line.sharers.iter().map(|(_, n)| n).collect();
            seen.sort_unstable();
            seen.dedup();
            if seen.len() != count {
                return Err(invariant(addr, "duplicate sharer"));
            }
        }
        for (id, txn) in self.table.iter() {
            for addr in [txn.request.addr, txn.target] {
                if self.table.find(addr) != Some(id) {
                    return Err(invariant(addr, format!("{id} missing from address index")));
                }
            }
        }
        Ok(())
    }
}

fn invariant(addr: BlockAddr, detail: impl Into<String>) -> CoherenceError {
    CoherenceError::Invariant {
        addr,
        detail: detail.into(),
    }
}
