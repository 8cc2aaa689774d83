//! # System Tests
//!
//! Whole-system runs through the transport: the three-reader reference
//! scenario, writes observed by later readers, concurrent traffic, error
//! reporting, a randomized sequential workload checked against a simple
//! memory model, and randomized concurrent workloads.

use std::collections::HashMap;

use coherence_core::common::{BlockAddr, CoherenceError, ConfigError, MesiState, NodeId};
use coherence_core::config::{Config, MemoryController};
use coherence_core::sim::System;
use coherence_core::sim::workload::{AccessKind, TraceOp, Workload};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::common::builder::{fast_config, n};
use crate::common::harness::init_tracing;

fn system(config: &Config) -> System {
    init_tracing();
    System::new(config).unwrap()
}

/// Last value node `node` observed.
fn last_read(system: &System, node: u16) -> Option<u64> {
    system
        .node(NodeId(node))
        .ok()
        .and_then(|n| n.driver.observations.last())
        .map(|o| o.value)
}

#[test]
fn test_reference_scenario() {
    let mut config = fast_config();
    config.protocol.num_sharers_bits = 1;
    config.node.count = 8;
    let mut sys = system(&config);

    let _ = sys.run(&Workload::reference_scenario()).unwrap();

    let reads: Vec<_> = sys.observations().iter().map(|o| (o.node, o.value)).collect();
    assert_eq!(reads, vec![(n(3), 0), (n(4), 0), (n(7), 0)]);

    let snapshot = sys.directory_snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].addr, BlockAddr(0x100));
    assert_eq!(snapshot[0].class, MesiState::Shared);
    assert_eq!(snapshot[0].sharers, vec![n(4), n(7)]);
    assert!(sys.node(n(3)).unwrap().responder.store().get(BlockAddr(0x100)).is_none());

    let stats = sys.stats();
    assert_eq!(stats.directory.forwards, 1);
    assert_eq!(stats.directory.invalidations, 1);
    assert_eq!(stats.node_totals().fills, 3);
    assert!(stats.messages > 0);
    sys.check_coherence().unwrap();
}

#[test]
fn test_write_then_remote_read() {
    let mut sys = system(&fast_config());
    let workload = Workload {
        sequential: true,
        ops: vec![
            TraceOp::write(1, 0x40, 0x1234),
            TraceOp::read(2, 0x40),
            TraceOp::write(3, 0x40, 0x5678),
            TraceOp::read(1, 0x40),
        ],
    };
    let _ = sys.run(&workload).unwrap();

    assert_eq!(last_read(&sys, 2), Some(0x1234));
    assert_eq!(last_read(&sys, 1), Some(0x5678));
    assert_eq!(sys.value_of(BlockAddr(0x40)), 0x5678);
    sys.check_coherence().unwrap();
}

#[test]
fn test_dirty_eviction_reaches_memory() {
    let mut sys = system(&fast_config());
    let workload = Workload {
        sequential: true,
        ops: vec![TraceOp::write(2, 0x80, 7), TraceOp::evict(2, 0x80)],
    };
    let _ = sys.run(&workload).unwrap();

    assert_eq!(sys.directory().memory().backing().peek(BlockAddr(0x80)), 7);
    assert!(sys.directory_snapshot().is_empty());
    sys.check_coherence().unwrap();
}

#[test]
fn test_concurrent_writers_converge() {
    let mut config = fast_config();
    config.memory.controller = MemoryController::Dram;
    let mut sys = system(&config);

    let ops = (1..=4)
        .flat_map(|node| {
            [
                TraceOp::write(node, 0x200, u64::from(node) * 0x11),
                TraceOp::read(node, 0x200),
                TraceOp::read(node, 0x240),
            ]
        })
        .collect();
    let _ = sys
        .run(&Workload {
            sequential: false,
            ops,
        })
        .unwrap();

    sys.check_coherence().unwrap();
    let value = sys.value_of(BlockAddr(0x200));
    assert!([0x11, 0x22, 0x33, 0x44].contains(&value));
    assert_eq!(sys.observations().len(), 8);
    assert!(sys.is_quiescent());
}

#[test]
fn test_unknown_node_rejected() {
    let mut sys = system(&fast_config());
    assert_eq!(
        sys.submit(TraceOp::read(0, 0x40)),
        Err(CoherenceError::InvalidNode(NodeId(0)))
    );
    assert_eq!(
        sys.submit(TraceOp::read(99, 0x40)),
        Err(CoherenceError::InvalidNode(NodeId(99)))
    );
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = fast_config();
    config.directory.sets = 3;
    assert!(matches!(System::new(&config), Err(ConfigError::Geometry { .. })));
}

#[test]
fn test_cycle_budget() {
    let mut config = fast_config();
    config.general.max_cycles = 3;
    let mut sys = system(&config);
    sys.submit(TraceOp::read(1, 0x40)).unwrap();
    assert_eq!(sys.run_until_quiescent(), Err(CoherenceError::Timeout { cycles: 3 }));
}

#[test]
fn test_reset_clears_system() {
    let mut sys = system(&fast_config());
    sys.submit(TraceOp::write(1, 0x40, 1)).unwrap();
    let _ = sys.run_until_quiescent().unwrap();
    assert_eq!(sys.directory_snapshot().len(), 1);

    sys.reset();
    let _ = sys.run_until_quiescent().unwrap();
    assert!(sys.directory_snapshot().is_empty());
    assert!(sys.nodes().iter().all(|node| node.responder.store().lines().count() == 0));
}

// ──────────────────────────────────────────────────────────
// Randomized sequential workloads
// ──────────────────────────────────────────────────────────

/// Small stores and two sharer slots so recalls and displacements happen often.
fn tight_config() -> Config {
    let mut config = fast_config();
    config.protocol.num_sharers_bits = 1;
    config.protocol.active_reqs = 2;
    config.directory.sets = 1;
    config.directory.ways = 2;
    config.node.count = 4;
    config.node.sets = 1;
    config.node.ways = 2;
    config
}

fn trace_op() -> impl Strategy<Value = TraceOp> {
    (1u16..=4, 0u64..4, 0u8..3, 1u64..1000).prop_map(|(node, block, kind, value)| {
        let addr = block * 0x40;
        match kind {
            0 => TraceOp::read(node, addr),
            1 => TraceOp::write(node, addr, value),
            _ => TraceOp::evict(node, addr),
        }
    })
}

/// Single-entry request queues so rejections and probe collisions are common.
fn contended_config(inclusion: bool) -> Config {
    let mut config = tight_config();
    config.node.upper_level_inclusion = inclusion;
    config.node.request_queue = 1;
    config.directory.request_queue = 1;
    config
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Every node runs its accesses at once, with and without an inclusive
    /// upper level: the run quiesces coherent, and every read returns either
    /// the initial zero or a value some node wrote to that block.
    #[test]
    fn concurrent_workloads_stay_coherent(
        ops in prop::collection::vec(trace_op(), 1..40),
        inclusion in any::<bool>(),
    ) {
        let mut sys = System::new(&contended_config(inclusion)).unwrap();
        let workload = Workload { sequential: false, ops: ops.clone() };
        let _ = sys.run(&workload).unwrap();

        prop_assert!(sys.is_quiescent());
        prop_assert!(sys.check_coherence().is_ok(), "{:?}", sys.check_coherence());
        for obs in sys.observations() {
            let written = ops.iter().any(|op| {
                op.op == AccessKind::Write && op.addr == obs.addr && op.value == obs.value
            });
            prop_assert!(obs.value == 0 || written, "{:?} read a value nobody wrote", obs);
        }
    }

    /// Run one access at a time: every read returns the last value written to
    /// that block, and the system is coherent after every access.
    #[test]
    fn sequential_reads_see_last_write(ops in prop::collection::vec(trace_op(), 1..40)) {
        let mut sys = System::new(&tight_config()).unwrap();
        let mut model: HashMap<BlockAddr, u64> = HashMap::new();

        for op in ops {
            sys.submit(op).unwrap();
            let _ = sys.run_until_quiescent().unwrap();
            match op.op {
                AccessKind::Write => {
                    let _ = model.insert(op.addr, op.value);
                }
                AccessKind::Read => {
                    let expected = model.get(&op.addr).copied().unwrap_or(0);
                    prop_assert_eq!(last_read(&sys, op.node.0), Some(expected));
                }
                AccessKind::Evict => {
                    prop_assert!(sys.node(op.node).unwrap().responder.store().get(op.addr).is_none());
                }
            }
            prop_assert!(sys.check_coherence().is_ok(), "{:?}", sys.check_coherence());
            prop_assert_eq!(sys.value_of(op.addr), model.get(&op.addr).copied().unwrap_or(0));
        }
    }
}
