//! Cache coherence responder.
//!
//! The node-side state machine. It answers directory probes against the local
//! line store, carries the local controller's misses and evictions onto the
//! wire one at a time, and turns grants back into local fills.
//!
//! Replies to probes:
//!
//! | Probe     | Line absent | Upper level holds it | Clean    | Dirty      |
//! |-----------|-------------|----------------------|----------|------------|
//! | `FwdGetS` | `NackD`     | controller decides   | `PutE`   | `RespPutM` |
//! | `Inv`     | `NackD`     | controller decides   | `InvAck` | `RespPutM` |
//!
//! A probe for a block whose `PutM` is already on the wire is answered with
//! `RespPutM` carrying that writeback's data.

/// Local controller port types.
pub mod local;

use std::collections::VecDeque;

use tracing::{debug, trace, warn};

use self::local::{ForwardKind, ForwardReply, LocalEvent, LocalOp, LocalRequest};
use crate::channel::MessageChannel;
use crate::common::addr::{BlockAddr, LineData, NodeId};
use crate::common::error::CoherenceError;
use crate::common::mesi::MesiState;
use crate::config::Config;
use crate::protocol::{Message, Opcode};
use crate::stats::NodeStats;
use crate::store::Geometry;
use crate::store::line_cache::{CacheLine, LineCacheStore};

/// States of the responder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RespState {
    /// Waiting for work.
    Idle,
    /// Sends the next local request (or resends a rejected one).
    CacheRequest,
    /// Applies a grant, acknowledgment, or rejection from the directory.
    DirectoryResponse,
    /// Sends a staged local request that collides with the probe being served.
    Backoff,
    /// Reads the probed line.
    MemoryRead,
    /// Decides the probe reply.
    DirectoryRequest,
    /// Waits for the local controller to answer a probe.
    ForwardControl,
    /// Sends the probe reply.
    NocResponse,
}

/// A local request translated to the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct WireRequest {
    msg: Message,
    op: LocalOp,
    /// Raised by the responder itself for a displaced line.
    internal: bool,
}

/// Node-side coherence engine.
#[derive(Debug)]
pub struct CacheResponder {
    node: NodeId,
    state: RespState,
    store: LineCacheStore,
    collision_guard: bool,
    inclusion: bool,
    staged: VecDeque<WireRequest>,
    outstanding: Option<WireRequest>,
    resend: bool,
    current: Option<Message>,
    probed: Option<CacheLine>,
    awaiting: Option<ForwardKind>,
    controller_reply: Option<ForwardReply>,
    reply: Option<Message>,
    events: VecDeque<LocalEvent>,
    /// Activity counters.
    pub stats: NodeStats,
}

impl CacheResponder {
    /// Creates the responder of cache node `node`.
    ///
    /// # Arguments
    ///
    /// * `node` - This node's id (never the directory id).
    /// * `config` - Line store geometry and coupling options from `config.node`.
    pub fn new(node: NodeId, config: &Config) -> Self {
        let geometry = Geometry {
            sets: config.node.sets,
            ways: config.node.ways,
            line_bytes: config.general.line_bytes,
        };
        Self {
            node,
            state: RespState::Idle,
            store: LineCacheStore::new(geometry, config.node.policy),
            collision_guard: config.node.collision_guard,
            inclusion: config.node.upper_level_inclusion,
            staged: VecDeque::new(),
            outstanding: None,
            resend: false,
            current: None,
            probed: None,
            awaiting: None,
            controller_reply: None,
            reply: None,
            events: VecDeque::new(),
            stats: NodeStats::default(),
        }
    }

    /// This node's id.
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Current state.
    pub const fn state(&self) -> RespState {
        self.state
    }

    /// The node's line store.
    pub const fn store(&self) -> &LineCacheStore {
        &self.store
    }

    /// Returns `true` when nothing is staged, outstanding, or being served.
    pub fn is_idle(&self) -> bool {
        self.state == RespState::Idle && self.outstanding.is_none() && self.staged.is_empty()
    }

    /// Address of the local request occupying the port, if any.
    pub fn busy_with(&self) -> Option<BlockAddr> {
        self.outstanding
            .or_else(|| self.staged.front().copied())
            .map(|r| r.msg.addr)
    }

    /// Drops every line and all in-flight work.
    pub fn reset(&mut self) {
        self.store.clear();
        self.staged.clear();
        self.outstanding = None;
        self.resend = false;
        self.current = None;
        self.probed = None;
        self.awaiting = None;
        self.controller_reply = None;
        self.reply = None;
        self.events.clear();
        self.state = RespState::Idle;
    }

    /// Submits a local request.
    ///
    /// The port is blocking: one request at a time, including the writeback of a
    /// line displaced by the previous fill. An eviction removes the line at once;
    /// evicting an absent line completes immediately.
    ///
    /// # Errors
    ///
    /// Returns [`CoherenceError::PortBusy`] while an earlier request is unfinished,
    /// or for an eviction of a line whose probe is still with the controller.
    pub fn submit(&mut self, req: LocalRequest) -> Result<(), CoherenceError> {
        if let Some(pending) = self.busy_with() {
            return Err(CoherenceError::PortBusy { pending });
        }
        if req.op.is_eviction() && self.forward_pending(req.addr) {
            return Err(CoherenceError::PortBusy { pending: req.addr });
        }

        let mut msg = Message::new(req.op.wire_opcode(), req.addr, self.node, NodeId::DIRECTORY);
        if req.op.is_eviction() {
            let Some(line) = self.store.remove(req.addr) else {
                self.events.push_back(LocalEvent::EvictDone { addr: req.addr });
                return Ok(());
            };
            msg = msg.with_data(line.data);
        } else if msg.opcode == Opcode::GetM {
            msg = msg.with_data(req.data);
        }

        trace!(node = %self.node, %msg, "local request staged");
        self.stats.wire_requests += 1;
        self.staged.push_back(WireRequest {
            msg,
            op: req.op,
            internal: false,
        });
        Ok(())
    }

    /// Returns `true` while a probe for `addr` waits on [`CacheResponder::forward_done`].
    fn forward_pending(&self, addr: BlockAddr) -> bool {
        self.state == RespState::ForwardControl && self.current.is_some_and(|m| m.addr == addr)
    }

    /// Data of a `PutM` for `addr` that is staged or on the wire.
    fn pending_writeback(&self, addr: BlockAddr) -> Option<LineData> {
        self.outstanding
            .iter()
            .chain(self.staged.iter())
            .find(|r| r.msg.addr == addr && r.msg.opcode == Opcode::PutM)
            .map(|r| r.msg.data)
    }

    /// Takes the oldest notification for the local controller.
    pub fn take_event(&mut self) -> Option<LocalEvent> {
        self.events.pop_front()
    }

    /// Completes a probe handed to the controller with [`LocalEvent::Forward`].
    ///
    /// # Errors
    ///
    /// Returns [`CoherenceError::Invariant`] when no probe for `reply.addr` is waiting.
    pub fn forward_done(&mut self, reply: ForwardReply) -> Result<(), CoherenceError> {
        if !self.forward_pending(reply.addr) {
            return Err(CoherenceError::Invariant {
                addr: reply.addr,
                detail: "no forward awaiting the controller".to_owned(),
            });
        }
        self.controller_reply = Some(reply);
        Ok(())
    }

    /// Local-port load.
    ///
    /// # Returns
    ///
    /// The line data on a hit, `None` on a miss.
    pub fn local_load(&mut self, addr: BlockAddr) -> Option<LineData> {
        let data = self.store.get_mut(addr).map(|line| line.data)?;
        self.stats.load_hits += 1;
        Some(data)
    }

    /// Local-port store; an Exclusive line silently becomes Modified.
    ///
    /// # Errors
    ///
    /// Returns [`CoherenceError::NotWritable`] when the line is absent or Shared.
    pub fn local_store(&mut self, addr: BlockAddr, data: LineData) -> Result<(), CoherenceError> {
        match self.store.get_mut(addr) {
            Some(line) if line.state.is_writable() => {
                line.state = MesiState::Modified;
                line.dirty = true;
                line.data = data;
                self.stats.store_hits += 1;
                Ok(())
            }
            _ => Err(CoherenceError::NotWritable {
                node: self.node,
                addr,
            }),
        }
    }

    /// Advances the responder by one cycle.
    pub fn tick(&mut self, channel: &mut MessageChannel) {
        let next = match self.state {
            RespState::Idle => self.idle(channel),
            RespState::CacheRequest => self.cache_request(channel),
            RespState::DirectoryResponse => self.directory_response(),
            RespState::Backoff => self.backoff(channel),
            RespState::MemoryRead => self.memory_read(),
            RespState::DirectoryRequest => self.directory_request(),
            RespState::ForwardControl => self.forward_control(),
            RespState::NocResponse => self.noc_response(channel),
        };
        if next != self.state {
            trace!(node = %self.node, from = ?self.state, to = ?next, "responder transition");
        }
        self.state = next;
    }

    fn idle(&mut self, channel: &mut MessageChannel) -> RespState {
        if let Some(msg) = channel.pop_response() {
            self.current = Some(msg);
            return RespState::DirectoryResponse;
        }
        if let Some(msg) = channel.pop_request() {
            self.current = Some(msg);
            if self.collision_guard && self.staged.iter().any(|r| r.msg.addr == msg.addr) {
                debug!(node = %self.node, %msg, "probe collides with staged request");
                self.stats.backoffs += 1;
                return RespState::Backoff;
            }
            return RespState::MemoryRead;
        }
        if self.resend || (self.outstanding.is_none() && !self.staged.is_empty()) {
            return RespState::CacheRequest;
        }
        RespState::Idle
    }

    fn cache_request(&mut self, channel: &mut MessageChannel) -> RespState {
        if self.resend {
            let Some(req) = self.outstanding else {
                self.resend = false;
                return RespState::Idle;
            };
            if channel.send(req.msg).is_err() {
                return RespState::CacheRequest;
            }
            trace!(node = %self.node, msg = %req.msg, "request resent");
            self.resend = false;
            self.stats.retries += 1;
            return RespState::Idle;
        }

        if self.outstanding.is_some() {
            return RespState::Idle;
        }
        let Some(req) = self.staged.front().copied() else {
            return RespState::Idle;
        };
        if channel.send(req.msg).is_err() {
            return RespState::CacheRequest;
        }
        let _ = self.staged.pop_front();
        trace!(node = %self.node, msg = %req.msg, "request sent");
        self.outstanding = Some(req);
        RespState::Idle
    }

    fn backoff(&mut self, channel: &mut MessageChannel) -> RespState {
        let Some(addr) = self.current.map(|m| m.addr) else {
            return RespState::Idle;
        };
        if self.outstanding.is_some() {
            return RespState::MemoryRead;
        }
        let Some(pos) = self.staged.iter().position(|r| r.msg.addr == addr) else {
            return RespState::MemoryRead;
        };
        let req = self.staged[pos];
        if channel.send(req.msg).is_err() {
            return RespState::Backoff;
        }
        let _ = self.staged.remove(pos);
        debug!(node = %self.node, msg = %req.msg, "staged request sent ahead of probe");
        self.outstanding = Some(req);
        RespState::MemoryRead
    }

    fn memory_read(&mut self) -> RespState {
        self.probed = self
            .current
            .and_then(|m| self.store.get(m.addr))
            .cloned();
        RespState::DirectoryRequest
    }

    fn directory_request(&mut self) -> RespState {
        let Some(msg) = self.current else {
            return RespState::Idle;
        };
        let kind = match msg.opcode {
            Opcode::FwdGetS => {
                self.stats.forwards += 1;
                ForwardKind::Share
            }
            Opcode::Inv => {
                self.stats.invalidations += 1;
                ForwardKind::Flush
            }
            _ => {
                warn!(node = %self.node, %msg, "unexpected probe opcode");
                self.current = None;
                return RespState::Idle;
            }
        };

        let in_flight = self
            .outstanding
            .filter(|r| r.msg.addr == msg.addr && r.msg.opcode == Opcode::PutM);
        if let Some(writeback) = in_flight {
            debug!(node = %self.node, %msg, "probe answered from writeback in flight");
            self.stats.dirty_responses += 1;
            return self.respond(msg.reply(Opcode::RespPutM).with_data(writeback.msg.data));
        }

        let Some(line) = self.probed.clone() else {
            self.stats.absent += 1;
            return self.respond(msg.reply(Opcode::NackD));
        };
        if line.inclusion {
            self.events.push_back(LocalEvent::Forward {
                addr: msg.addr,
                kind,
                data: line.data,
            });
            self.awaiting = Some(kind);
            return RespState::ForwardControl;
        }
        self.probed = None;
        self.settle(msg, kind, line.needs_writeback(), line.data)
    }

    fn forward_control(&mut self) -> RespState {
        let Some(answer) = self.controller_reply.take() else {
            return RespState::ForwardControl;
        };
        let probed = self.probed.take();
        let (Some(msg), Some(kind)) = (self.current, self.awaiting.take()) else {
            return RespState::Idle;
        };

        if let Some(written) = self.pending_writeback(msg.addr) {
            debug!(node = %self.node, %msg, "forward answered from pending writeback");
            self.stats.dirty_responses += 1;
            let data = answer.data.unwrap_or(written);
            return self.respond(msg.reply(Opcode::RespPutM).with_data(data));
        }

        // A local store may have dirtied the line while the controller held the probe.
        let Some(line) = self.store.get(msg.addr).cloned().or(probed) else {
            self.stats.absent += 1;
            return self.respond(msg.reply(Opcode::NackD));
        };
        let dirty = answer.data.is_some() || line.needs_writeback();
        let data = answer.data.unwrap_or(line.data);
        self.settle(msg, kind, dirty, data)
    }

    /// Applies a probe to the local line and prepares the reply.
    fn settle(&mut self, msg: Message, kind: ForwardKind, dirty: bool, data: LineData) -> RespState {
        match kind {
            ForwardKind::Share => {
                if let Some(line) = self.store.get_mut(msg.addr) {
                    line.state = MesiState::Shared;
                    line.dirty = false;
                    line.data = data;
                }
            }
            ForwardKind::Flush => {
                let _ = self.store.remove(msg.addr);
            }
        }

        let reply = if dirty {
            self.stats.dirty_responses += 1;
            msg.reply(Opcode::RespPutM).with_data(data)
        } else {
            match kind {
                ForwardKind::Share => msg.reply(Opcode::PutE),
                ForwardKind::Flush => msg.reply(Opcode::InvAck),
            }
        };
        self.respond(reply)
    }

    fn respond(&mut self, reply: Message) -> RespState {
        self.reply = Some(reply);
        RespState::NocResponse
    }

    fn noc_response(&mut self, channel: &mut MessageChannel) -> RespState {
        let Some(reply) = self.reply else {
            return RespState::Idle;
        };
        if channel.send(reply).is_err() {
            return RespState::NocResponse;
        }
        trace!(node = %self.node, %reply, "probe answered");
        self.reply = None;
        self.current = None;
        self.probed = None;
        RespState::Idle
    }

    fn directory_response(&mut self) -> RespState {
        let Some(msg) = self.current.take() else {
            return RespState::Idle;
        };
        let Some(req) = self.outstanding.filter(|r| r.msg.addr == msg.addr) else {
            warn!(node = %self.node, %msg, "response matches no outstanding request");
            return RespState::Idle;
        };

        match msg.opcode {
            Opcode::Data | Opcode::DataS if !req.op.is_eviction() => {
                let state = match (msg.opcode, req.msg.opcode) {
                    (Opcode::DataS, _) => MesiState::Shared,
                    (_, Opcode::GetM) => MesiState::Modified,
                    _ => MesiState::Exclusive,
                };
                let data = if state == MesiState::Modified {
                    req.msg.data
                } else {
                    msg.data
                };
                self.install(msg.addr, state, data);
                self.outstanding = None;
                self.stats.fills += 1;
                self.events.push_back(LocalEvent::Fill {
                    addr: msg.addr,
                    state,
                    data,
                });
                RespState::Idle
            }
            Opcode::PutAck if req.op.is_eviction() => {
                self.outstanding = None;
                if !req.internal {
                    self.events.push_back(LocalEvent::EvictDone { addr: msg.addr });
                }
                RespState::Idle
            }
            Opcode::NackB => {
                debug!(node = %self.node, msg = %req.msg, "rejected by directory, resending");
                self.resend = true;
                RespState::CacheRequest
            }
            _ => {
                warn!(node = %self.node, %msg, "response does not fit outstanding request");
                RespState::Idle
            }
        }
    }

    /// Installs a granted line; a displaced line is queued as a writeback ahead of
    /// any other local request.
    fn install(&mut self, addr: BlockAddr, state: MesiState, data: LineData) {
        let line = CacheLine::new(state, data, self.inclusion);
        let Some((victim, old)) = self.store.install(addr, line) else {
            return;
        };
        let op = if old.needs_writeback() {
            LocalOp::Writeback
        } else {
            LocalOp::Evict
        };
        let msg = Message::new(op.wire_opcode(), victim, self.node, NodeId::DIRECTORY).with_data(old.data);
        debug!(node = %self.node, %victim, %msg, "line displaced");
        self.stats.evictions += 1;
        self.staged.push_front(WireRequest {
            msg,
            op,
            internal: true,
        });
    }
}
