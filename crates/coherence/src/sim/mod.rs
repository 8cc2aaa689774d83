//! Multi-node simulation harness.
//!
//! Wires one directory and `node.count` cache nodes through a fixed-latency
//! transport. It provides:
//! 1. **Tick:** Transport delivery, directory, nodes in id order, then local drivers.
//! 2. **Workloads:** Sequential or concurrent execution of an access trace.
//! 3. **Checks:** Quiescence detection and cross-node coherence verification.

/// Fixed-latency transport.
pub mod network;

/// Cache node and its local controller.
pub mod node;

/// Access traces.
pub mod workload;

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use self::network::Network;
use self::node::{CacheNode, Observation};
use self::workload::{TraceOp, Workload};
use crate::channel::{Admission, MessageChannel, Role};
use crate::common::addr::{BlockAddr, LineData, NodeId};
use crate::common::error::{CoherenceError, ConfigError};
use crate::common::mesi::MesiState;
use crate::config::Config;
use crate::directory::DirectoryEngine;
use crate::stats::SimStats;

/// Directory entry as reported to users.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirectoryEntryView {
    /// Block address.
    pub addr: BlockAddr,
    /// Derived MESI class.
    pub class: MesiState,
    /// Modified bit.
    pub modified: bool,
    /// Sharers in slot order.
    pub sharers: Vec<NodeId>,
}

/// A directory, its cache nodes, and the transport between them.
///
/// # Examples
///
/// ```
/// use coherence_core::config::Config;
/// use coherence_core::sim::System;
/// use coherence_core::sim::workload::TraceOp;
///
/// let mut system = System::new(&Config::default()).unwrap();
/// system.submit(TraceOp::write(1, 0x40, 99)).unwrap();
/// system.run_until_quiescent().unwrap();
/// system.submit(TraceOp::read(2, 0x40)).unwrap();
/// system.run_until_quiescent().unwrap();
///
/// assert_eq!(system.observations()[0].value, 99);
/// system.check_coherence().unwrap();
/// ```
#[derive(Debug)]
pub struct System {
    config: Config,
    cycle: u64,
    started: Instant,
    directory: DirectoryEngine,
    dir_channel: MessageChannel,
    nodes: Vec<CacheNode>,
    network: Network,
}

impl System {
    /// Builds a system from a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first problem [`Config::validate`] reports.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_directory(config, DirectoryEngine::new(config)))
    }

    /// Builds a system around a prepared directory engine.
    pub fn with_directory(config: &Config, directory: DirectoryEngine) -> Self {
        let nodes = (1..=config.node.count)
            .map(|id| CacheNode::new(NodeId(id as u16), config))
            .collect();
        Self {
            config: config.clone(),
            cycle: 0,
            started: Instant::now(),
            directory,
            dir_channel: MessageChannel::new(
                Role::Directory,
                NodeId::DIRECTORY,
                config.directory.request_queue,
                config.directory.response_queue,
                config.directory.outbound_queue,
            ),
            nodes,
            network: Network::new(config.network.hop_latency, config.general.trace_messages),
        }
    }

    /// Cycles simulated so far.
    pub const fn cycle(&self) -> u64 {
        self.cycle
    }

    /// The configuration the system was built from.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The directory engine.
    pub const fn directory(&self) -> &DirectoryEngine {
        &self.directory
    }

    /// Cache node `id`.
    ///
    /// # Errors
    ///
    /// Returns [`CoherenceError::InvalidNode`] for the directory id or an id past
    /// the configured node count.
    pub fn node(&self, id: NodeId) -> Result<&CacheNode, CoherenceError> {
        id.node_index()
            .and_then(|i| self.nodes.get(i))
            .ok_or(CoherenceError::InvalidNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut CacheNode, CoherenceError> {
        id.node_index()
            .and_then(|i| self.nodes.get_mut(i))
            .ok_or(CoherenceError::InvalidNode(id))
    }

    /// All cache nodes in id order.
    pub fn nodes(&self) -> &[CacheNode] {
        &self.nodes
    }

    /// Queues an access on its node's driver.
    ///
    /// # Errors
    ///
    /// Returns [`CoherenceError::InvalidNode`] when `op.node` is not a cache node.
    pub fn submit(&mut self, op: TraceOp) -> Result<(), CoherenceError> {
        self.node_mut(op.node)?.driver.push(op);
        Ok(())
    }

    /// Advances every component by one cycle.
    pub fn tick(&mut self) {
        let now = self.cycle;
        let dir_channel = &mut self.dir_channel;
        let nodes = &mut self.nodes;
        self.network.deliver(now, |msg| {
            if msg.dst.is_directory() {
                return dir_channel.accept(msg);
            }
            match msg.dst.node_index().and_then(|i| nodes.get_mut(i)) {
                Some(node) => node.channel.accept(msg),
                None => {
                    warn!(%msg, "message for unknown node");
                    Admission::Dropped
                }
            }
        });

        self.directory.tick(&mut self.dir_channel);
        for node in &mut self.nodes {
            node.responder.tick(&mut node.channel);
        }
        for node in &mut self.nodes {
            node.driver.tick(&mut node.responder, now);
        }

        if let Some(msg) = self.dir_channel.pop_outbound() {
            self.network.send(msg, now);
        }
        for node in &mut self.nodes {
            if let Some(msg) = node.channel.pop_outbound() {
                self.network.send(msg, now);
            }
        }
        self.cycle += 1;
    }

    /// Returns `true` when nothing is in flight and every engine and driver is idle.
    pub fn is_quiescent(&self) -> bool {
        self.network.is_empty()
            && self.dir_channel.is_idle()
            && self.directory.is_idle()
            && self.nodes.iter().all(CacheNode::is_quiet)
    }

    /// Ticks until the system is quiescent.
    ///
    /// # Returns
    ///
    /// The number of cycles simulated by this call.
    ///
    /// # Errors
    ///
    /// Returns [`CoherenceError::Timeout`] after `general.max_cycles` cycles.
    pub fn run_until_quiescent(&mut self) -> Result<u64, CoherenceError> {
        let start = self.cycle;
        // The first tick lets a freshly built directory leave `Reset`.
        self.tick();
        while !self.is_quiescent() {
            if self.cycle - start >= self.config.general.max_cycles {
                return Err(CoherenceError::Timeout {
                    cycles: self.cycle - start,
                });
            }
            self.tick();
        }
        Ok(self.cycle - start)
    }

    /// Runs a workload to completion.
    ///
    /// # Errors
    ///
    /// Returns [`CoherenceError::InvalidNode`] for an access by an unknown node and
    /// [`CoherenceError::Timeout`] when the system fails to quiesce.
    pub fn run(&mut self, workload: &Workload) -> Result<u64, CoherenceError> {
        let start = self.cycle;
        if workload.sequential {
            for op in &workload.ops {
                self.submit(*op)?;
                let _ = self.run_until_quiescent()?;
            }
        } else {
            for op in &workload.ops {
                self.submit(*op)?;
            }
            let _ = self.run_until_quiescent()?;
        }
        info!(cycles = self.cycle - start, ops = workload.ops.len(), "workload complete");
        Ok(self.cycle - start)
    }

    /// Read values observed by every driver, in node order.
    pub fn observations(&self) -> Vec<Observation> {
        self.nodes
            .iter()
            .flat_map(|n| n.driver.observations.iter().copied())
            .collect()
    }

    /// Current value of a block: the owner's copy when one node holds it
    /// Modified, otherwise the backing store.
    pub fn value_of(&self, addr: BlockAddr) -> LineData {
        self.nodes
            .iter()
            .filter_map(|n| n.responder.store().get(addr))
            .find(|line| line.state == MesiState::Modified)
            .map_or_else(|| self.directory.memory().backing().peek(addr), |line| line.data)
    }

    /// Tracked directory entries, sorted by address.
    pub fn directory_snapshot(&self) -> Vec<DirectoryEntryView> {
        let mut entries: Vec<_> = self
            .directory
            .store()
            .entries()
            .map(|(addr, line)| DirectoryEntryView {
                addr,
                class: line.class(),
                modified: line.modified,
                sharers: line.sharers.iter().map(|(_, n)| n).collect(),
            })
            .collect();
        entries.sort_by_key(|e| e.addr);
        entries
    }

    /// Verifies cross-node coherence; meaningful only when quiescent.
    ///
    /// Checks the directory's own invariants, then for every block held anywhere:
    /// a Modified or Exclusive copy is the only copy, every copy is recorded in
    /// the directory, and clean copies match the backing store.
    ///
    /// # Errors
    ///
    /// Returns [`CoherenceError::Invariant`] for the first violation found.
    pub fn check_coherence(&self) -> Result<(), CoherenceError> {
        self.directory.check_invariants()?;

        let mut held: Vec<(BlockAddr, NodeId, MesiState, LineData)> = self
            .nodes
            .iter()
            .flat_map(|n| {
                n.responder
                    .store()
                    .lines()
                    .map(move |(addr, line)| (addr, n.id(), line.state, line.data))
            })
            .collect();
        held.sort_by_key(|&(addr, node, ..)| (addr, node));

        for group in held.chunk_by(|a, b| a.0 == b.0) {
            let addr = group[0].0;
            let owners = group.iter().filter(|h| h.2.is_writable()).count();
            if owners > 0 && group.len() > 1 {
                return Err(CoherenceError::Invariant {
                    addr,
                    detail: format!("{} copies alongside a writable one", group.len()),
                });
            }

            let entry = self.directory.store().get(addr);
            for &(_, node, state, data) in group {
                if !entry.is_some_and(|e| e.sharers.contains(node)) {
                    return Err(CoherenceError::Invariant {
                        addr,
                        detail: format!("{node} holds the block untracked"),
                    });
                }
                let memory = self.directory.memory().backing().peek(addr);
                if state != MesiState::Modified && data != memory {
                    return Err(CoherenceError::Invariant {
                        addr,
                        detail: format!("clean copy at {node} is {data:#x}, memory {memory:#x}"),
                    });
                }
            }
        }
        debug!(blocks = held.len(), "coherence check passed");
        Ok(())
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> SimStats {
        let mut stats = SimStats::since(self.started);
        stats.cycles = self.cycle;
        stats.messages = self.network.delivered;
        stats.stalls = self.network.stalls;
        stats.directory = self.directory.stats.clone();
        stats.nodes = self.nodes.iter().map(|n| n.responder.stats.clone()).collect();
        stats
    }

    /// Discards all state and schedules a directory reset.
    pub fn reset(&mut self) {
        self.directory.reset();
        self.dir_channel.clear();
        self.network.clear();
        for node in &mut self.nodes {
            node.responder.reset();
            node.channel.clear();
            node.driver.clear();
        }
    }
}
