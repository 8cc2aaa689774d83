//! # Memory Port Tests
//!
//! The port sub-FSM driven against a mocked backing store, the fixed and DRAM
//! latency controllers, and the directory's reissue of a failed read.

use coherence_core::common::BlockAddr;
use coherence_core::memory::{
    BackingStore, DramController, MainMemory, MemoryController, MemoryPort, PortState,
    SimpleController,
};
use coherence_core::protocol::Opcode;
use mockall::Sequence;
use mockall::predicate::eq;
use pretty_assertions::assert_eq;

use crate::common::builder::{A, fast_config, to_dir};
use crate::common::harness::DirHarness;
use crate::common::mocks::backing::{MockBacking, done, failed};

#[test]
fn test_read_latches_until_cleared() {
    let mut backing = MockBacking::new();
    let _ = backing.expect_begin_read().with(eq(A)).times(1).return_const(());
    let mut seq = Sequence::new();
    let _ = backing
        .expect_poll()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| None);
    let _ = backing
        .expect_poll()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| done(42));

    let mut port = MemoryPort::new(Box::new(backing));
    assert!(port.issue_read(A));
    assert_eq!(port.state(), PortState::Reading);
    assert!(!port.issue_write(A, 1), "port accepts one access at a time");

    port.tick();
    assert_eq!(port.state(), PortState::Reading);
    port.tick();
    assert_eq!(port.state(), PortState::WaitForClear);
    assert_eq!(port.completion().map(|c| c.data), Some(42));

    // Ticking while latched does not poll again.
    port.tick();
    assert_eq!(port.state(), PortState::WaitForClear);

    port.clear();
    assert_eq!(port.state(), PortState::Idle);
    assert!(port.completion().is_none());
}

#[test]
fn test_clear_only_acts_on_latched_completion() {
    let mut backing = MockBacking::new();
    let _ = backing.expect_begin_write().with(eq(A), eq(9)).times(1).return_const(());
    let _ = backing.expect_poll().returning(|| None);

    let mut port = MemoryPort::new(Box::new(backing));
    assert!(port.issue_write(A, 9));
    port.clear();
    assert_eq!(port.state(), PortState::Writing);
}

#[test]
fn test_reset_aborts_in_flight_access() {
    let mut backing = MockBacking::new();
    let _ = backing.expect_begin_read().return_const(());
    let _ = backing.expect_abort().times(1).return_const(());

    let mut port = MemoryPort::new(Box::new(backing));
    assert!(port.issue_read(A));
    port.reset();
    assert_eq!(port.state(), PortState::Idle);
}

#[test]
fn test_directory_reissues_failed_read() {
    let mut backing = MockBacking::new();
    let _ = backing.expect_abort().return_const(());
    let _ = backing.expect_begin_read().with(eq(A)).times(2).return_const(());
    let mut seq = Sequence::new();
    let _ = backing
        .expect_poll()
        .times(1)
        .in_sequence(&mut seq)
        .returning(failed);
    let _ = backing
        .expect_poll()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| done(5));

    let mut dir = DirHarness::with_backing(&fast_config(), Box::new(backing));
    let out = dir.send(to_dir(Opcode::GetS, A, 1));

    assert_eq!(out.len(), 1);
    assert_eq!((out[0].opcode, out[0].data), (Opcode::Data, 5));
    assert_eq!(dir.engine.stats.memory_reads, 2);
}

// ──────────────────────────────────────────────────────────
// Latency controllers and main memory
// ──────────────────────────────────────────────────────────

#[test]
fn test_simple_controller_is_fixed() {
    let mut ctrl = SimpleController::new(7);
    assert_eq!(ctrl.access_latency(0), 7);
    assert_eq!(ctrl.access_latency(0xFFFF_0000), 7);
}

#[test]
fn test_dram_row_buffer() {
    let mut ctrl = DramController::new(2, 3, 4);
    assert_eq!(ctrl.access_latency(0x0), 3 + 2, "first access opens the row");
    assert_eq!(ctrl.access_latency(0x40), 2, "row hit");
    assert_eq!(ctrl.access_latency(0x1_0000), 4 + 3 + 2, "row conflict");
}

#[test]
fn test_main_memory_timing_and_contents() {
    let mut memory = MainMemory::new(Box::new(SimpleController::new(2)));
    memory.preload(BlockAddr(0x80), 3);

    memory.begin_read(BlockAddr(0x80));
    assert!(memory.poll().is_none());
    assert!(memory.poll().is_none());
    assert_eq!(memory.poll().map(|c| c.data), Some(3));
    assert!(memory.poll().is_none(), "nothing in flight");

    memory.begin_write(BlockAddr(0xC0), 11);
    memory.abort();
    assert!(memory.poll().is_none());
    assert_eq!(memory.peek(BlockAddr(0xC0)), 0, "aborted write never lands");
    assert_eq!(memory.peek(BlockAddr(0x80)), 3);
}

#[test]
fn test_main_memory_read_sees_completed_write() {
    let mut memory = MainMemory::new(Box::new(SimpleController::new(1)));

    memory.begin_write(BlockAddr(0x40), 0x5A);
    assert!(memory.poll().is_none());
    let write = memory.poll().unwrap();
    assert!(write.ok);
    assert_eq!(write.data, 0x5A);

    memory.begin_read(BlockAddr(0x40));
    assert!(memory.poll().is_none());
    assert_eq!(memory.poll().map(|c| c.data), Some(0x5A));
    assert_eq!(memory.peek(BlockAddr(0x40)), 0x5A);
}
