//! # Active Transaction Table Tests
//!
//! Admission limits, the address index, pending-ack bookkeeping, re-arming,
//! and round-robin selection of ready transactions.

use coherence_core::common::{BlockAddr, NodeId};
use coherence_core::directory::transactions::{ActiveTable, Probe, Transaction, TxnId};
use coherence_core::protocol::Opcode;
use coherence_core::store::directory::SharerList;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::common::builder::{A, B, C, n, to_dir};

fn sharers(nodes: &[u16]) -> SharerList {
    let mut list = SharerList::new(4);
    for &node in nodes {
        let _ = list.insert(NodeId(node));
    }
    list
}

fn forward(addr: BlockAddr, requester: u16, owner: u16) -> Transaction {
    Transaction::new(to_dir(Opcode::GetS, addr, requester), addr, Probe::Forward, sharers(&[owner]))
}

#[test]
fn test_pending_tracks_snapshot_slots() {
    let mut txn = Transaction::new(
        to_dir(Opcode::GetM, A, 9),
        A,
        Probe::Invalidate,
        sharers(&[1, 2, 3]),
    );
    assert_eq!(txn.pending, 0b111);
    assert!(!txn.is_ready());

    assert!(txn.answer(n(2)));
    assert!(!txn.answer(n(2)), "second answer from the same node is ignored");
    assert!(!txn.answer(n(8)), "node outside the snapshot");
    assert_eq!(txn.pending, 0b101);

    let probes: Vec<_> = txn.probes().iter().map(|m| (m.opcode, m.dst, m.requestor)).collect();
    assert_eq!(
        probes,
        vec![(Opcode::Inv, n(1), n(9)), (Opcode::Inv, n(3), n(9))]
    );

    assert!(txn.answer(n(1)));
    assert!(txn.answer(n(3)));
    assert!(txn.is_ready());
    assert!(txn.probes().is_empty());
}

#[test]
fn test_recall_targets_victim() {
    let txn = Transaction::new(to_dir(Opcode::GetS, B, 2), A, Probe::Invalidate, sharers(&[1]));
    assert!(txn.is_recall());
    let probe = txn.probe_to(n(1));
    assert_eq!((probe.opcode, probe.addr, probe.src), (Opcode::Inv, A, NodeId::DIRECTORY));
}

#[test]
fn test_admit_indexes_both_addresses() {
    let mut table = ActiveTable::new(2);
    let recall = Transaction::new(to_dir(Opcode::GetS, B, 2), A, Probe::Invalidate, sharers(&[1]));
    let id = table.admit(recall).unwrap();

    assert_eq!(table.find(A), Some(id));
    assert_eq!(table.find(B), Some(id));
    assert_eq!(table.waiting_on(A, n(1)), Some(id));
    assert_eq!(table.waiting_on(B, n(1)), None, "probes refer to the victim only");

    // Either address conflicts.
    assert!(table.admit(forward(A, 3, 4)).is_err());
    assert!(table.admit(forward(B, 3, 4)).is_err());
    assert!(table.admit(forward(C, 3, 4)).is_ok());
    assert!(!table.has_free());
    assert_eq!(table.high_water, 2);
}

#[test]
fn test_retire_drops_index() {
    let mut table = ActiveTable::new(1);
    let id = table.admit(forward(A, 2, 1)).unwrap();
    assert_eq!(table.retire(id).map(|t| t.request.src), Some(n(2)));
    assert!(table.find(A).is_none());
    assert!(table.is_empty());
    assert!(table.retire(id).is_none());
}

#[test]
fn test_rearm_moves_target() {
    let mut table = ActiveTable::new(2);
    let recall = Transaction::new(to_dir(Opcode::GetS, B, 2), A, Probe::Invalidate, sharers(&[1]));
    let id = table.admit(recall).unwrap();
    let other = table.admit(forward(C, 5, 6)).unwrap();

    assert!(!table.rearm(id, C, Probe::Invalidate, sharers(&[6])), "target owned elsewhere");
    assert!(table.rearm(id, B, Probe::Invalidate, sharers(&[3, 4])));

    let txn = table.get(id).unwrap();
    assert_eq!(txn.target, B);
    assert_eq!(txn.pending, 0b11);
    assert!(table.find(A).is_none());
    assert_eq!(table.find(C), Some(other));
}

#[test]
fn test_next_ready_round_robin() {
    let mut table = ActiveTable::new(3);
    for (addr, owner) in [(A, 1), (B, 2), (C, 3)] {
        let _ = table.admit(forward(addr, 9, owner)).unwrap();
    }
    assert_eq!(table.next_ready(), None);

    for (id, owner) in [(0, 1), (1, 2), (2, 3)] {
        assert!(table.get_mut(TxnId(id)).unwrap().answer(n(owner)));
    }
    assert_eq!(table.next_ready(), Some(TxnId(0)));
    assert_eq!(table.next_ready(), Some(TxnId(1)));
    assert_eq!(table.next_ready(), Some(TxnId(2)));
    assert_eq!(table.next_ready(), Some(TxnId(0)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The table never holds more than its capacity and never two transactions
    /// on one block, whatever mix of admits and retires arrives.
    #[test]
    fn admission_respects_capacity(
        capacity in 1usize..6,
        ops in prop::collection::vec((any::<bool>(), 0u64..8), 1..64),
    ) {
        let mut table = ActiveTable::new(capacity);
        for (admit, block) in ops {
            let addr = BlockAddr(block * 0x40);
            if admit {
                let busy = table.find(addr).is_some();
                let full = !table.has_free();
                let result = table.admit(forward(addr, 1, 2));
                prop_assert_eq!(result.is_ok(), !busy && !full);
            } else if let Some(id) = table.find(addr) {
                prop_assert!(table.retire(id).is_some());
            }
            prop_assert!(table.len() <= capacity);
            let mut addrs: Vec<_> = table.iter().map(|(_, t)| t.target).collect();
            let live = addrs.len();
            addrs.sort_unstable();
            addrs.dedup();
            prop_assert_eq!(addrs.len(), live);
        }
    }
}
