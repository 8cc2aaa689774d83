//! Cache node: responder, channel, and a blocking local controller.

use std::collections::VecDeque;

use serde::Serialize;
use tracing::{trace, warn};

use super::workload::{AccessKind, TraceOp};
use crate::channel::{MessageChannel, Role};
use crate::common::addr::{BlockAddr, LineData, NodeId};
use crate::config::Config;
use crate::responder::CacheResponder;
use crate::responder::local::{ForwardReply, LocalEvent, LocalOp, LocalRequest};

/// A value returned to a driver by a read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Observation {
    /// Reading node.
    pub node: NodeId,
    /// Block read.
    pub addr: BlockAddr,
    /// Value observed.
    pub value: LineData,
    /// Cycle the value was returned.
    pub cycle: u64,
}

/// Simulated local cache controller of one node.
///
/// Works through its accesses in order and waits for each miss or eviction to
/// complete before issuing the next. Probes handed up by the responder are
/// answered at once; the driver models no upper level holding dirty data.
#[derive(Debug)]
pub struct NodeDriver {
    node: NodeId,
    ops: VecDeque<TraceOp>,
    waiting: Option<TraceOp>,
    /// Values returned by completed reads, in completion order.
    pub observations: Vec<Observation>,
    /// Accesses completed.
    pub completed: u64,
}

impl NodeDriver {
    /// Creates an idle driver for `node`.
    pub const fn new(node: NodeId) -> Self {
        Self {
            node,
            ops: VecDeque::new(),
            waiting: None,
            observations: Vec::new(),
            completed: 0,
        }
    }

    /// Appends an access.
    pub fn push(&mut self, op: TraceOp) {
        self.ops.push_back(op);
    }

    /// Returns `true` when every access has completed.
    pub fn is_done(&self) -> bool {
        self.ops.is_empty() && self.waiting.is_none()
    }

    /// Drops all queued accesses.
    pub fn clear(&mut self) {
        self.ops.clear();
        self.waiting = None;
    }

    /// Handles responder events, then issues the next access if nothing is waiting.
    pub fn tick(&mut self, responder: &mut CacheResponder, cycle: u64) {
        while let Some(event) = responder.take_event() {
            self.on_event(responder, event, cycle);
        }
        if self.waiting.is_some() {
            return;
        }
        let Some(op) = self.ops.front().copied() else {
            return;
        };

        match op.op {
            AccessKind::Read => {
                if let Some(value) = responder.local_load(op.addr) {
                    self.observe(op.addr, value, cycle);
                    self.finish();
                } else {
                    self.issue(responder, op, LocalRequest::new(LocalOp::ReadMiss, op.addr));
                }
            }
            AccessKind::Write => {
                if responder.local_store(op.addr, op.value).is_ok() {
                    self.finish();
                } else {
                    let kind = if responder.store().get(op.addr).is_some() {
                        LocalOp::Upgrade
                    } else {
                        LocalOp::ReadForOwnership
                    };
                    self.issue(responder, op, LocalRequest::store(kind, op.addr, op.value));
                }
            }
            AccessKind::Evict => {
                let kind = match responder.store().get(op.addr) {
                    Some(line) if line.needs_writeback() => LocalOp::Writeback,
                    _ => LocalOp::Evict,
                };
                self.issue(responder, op, LocalRequest::new(kind, op.addr));
            }
        }
    }

    fn issue(&mut self, responder: &mut CacheResponder, op: TraceOp, req: LocalRequest) {
        match responder.submit(req) {
            Ok(()) => {
                trace!(node = %self.node, ?req, "local request submitted");
                let _ = self.ops.pop_front();
                self.waiting = Some(op);
            }
            Err(err) => trace!(node = %self.node, %err, "local port busy"),
        }
    }

    fn on_event(&mut self, responder: &mut CacheResponder, event: LocalEvent, cycle: u64) {
        let Some(op) = self.waiting else {
            if let LocalEvent::Forward { addr, .. } = event {
                self.answer_forward(responder, addr);
            }
            return;
        };
        match event {
            LocalEvent::Fill { addr, data, .. } if addr == op.addr => {
                if op.op == AccessKind::Read {
                    self.observe(addr, data, cycle);
                }
                self.waiting = None;
                self.completed += 1;
            }
            LocalEvent::EvictDone { addr } if addr == op.addr && op.op == AccessKind::Evict => {
                self.waiting = None;
                self.completed += 1;
            }
            LocalEvent::Forward { addr, .. } => self.answer_forward(responder, addr),
            other => warn!(node = %self.node, ?other, "event matches no waiting access"),
        }
    }

    fn answer_forward(&self, responder: &mut CacheResponder, addr: BlockAddr) {
        if let Err(err) = responder.forward_done(ForwardReply { addr, data: None }) {
            warn!(node = %self.node, %err, "forward answer refused");
        }
    }

    fn observe(&mut self, addr: BlockAddr, value: LineData, cycle: u64) {
        self.observations.push(Observation {
            node: self.node,
            addr,
            value,
            cycle,
        });
    }

    fn finish(&mut self) {
        let _ = self.ops.pop_front();
        self.completed += 1;
    }
}

/// One cache node of the simulated system.
#[derive(Debug)]
pub struct CacheNode {
    /// Coherence responder and line store.
    pub responder: CacheResponder,
    /// Inbound queues and outbound link.
    pub channel: MessageChannel,
    /// Local controller.
    pub driver: NodeDriver,
}

impl CacheNode {
    /// Builds node `id` from `config.node`.
    pub fn new(id: NodeId, config: &Config) -> Self {
        Self {
            responder: CacheResponder::new(id, config),
            channel: MessageChannel::new(
                Role::Cache,
                id,
                config.node.request_queue,
                config.node.response_queue,
                config.node.outbound_queue,
            ),
            driver: NodeDriver::new(id),
        }
    }

    /// Node id.
    pub const fn id(&self) -> NodeId {
        self.responder.node()
    }

    /// Returns `true` when the node has nothing left to do.
    pub fn is_quiet(&self) -> bool {
        self.responder.is_idle() && self.channel.is_idle() && self.driver.is_done()
    }
}
