//! # Store Tests
//!
//! Set-associative geometry and lookup, replacement policies, the sharer list,
//! and the directory's derived MESI class.

use coherence_core::common::{BlockAddr, MesiState, NodeId};
use coherence_core::config::ReplacementPolicy;
use coherence_core::store::directory::{DirectoryLine, SharerDirectoryStore, SharerList};
use coherence_core::store::line_cache::{CacheLine, LineCacheStore};
use coherence_core::store::policies::{self, FifoPolicy, LruPolicy, RandomPolicy, ReplacementPolicy as _};
use coherence_core::store::{Geometry, Lookup};
use proptest::prelude::*;

const GEOMETRY: Geometry = Geometry {
    sets: 4,
    ways: 2,
    line_bytes: 64,
};

/// Address of the `n`th block mapping to `set`.
fn in_set(set: u64, n: u64) -> BlockAddr {
    BlockAddr((n * GEOMETRY.sets as u64 + set) * 64)
}

fn line(state: MesiState, data: u64) -> CacheLine {
    CacheLine::new(state, data, false)
}

// ──────────────────────────────────────────────────────────
// Geometry
// ──────────────────────────────────────────────────────────

#[test]
fn test_geometry_split() {
    let addr = BlockAddr(0x1C0);
    assert_eq!(GEOMETRY.set_index(addr), 3);
    assert_eq!(GEOMETRY.tag(addr), 1);
    assert_eq!(GEOMETRY.block_addr(3, 1), addr);
}

proptest! {
    #[test]
    fn geometry_rebuilds_aligned_addresses(block in 0u64..1 << 40) {
        let addr = BlockAddr(block * 64);
        let rebuilt = GEOMETRY.block_addr(GEOMETRY.set_index(addr), GEOMETRY.tag(addr));
        prop_assert_eq!(rebuilt, addr);
    }
}

// ──────────────────────────────────────────────────────────
// Line cache
// ──────────────────────────────────────────────────────────

#[test]
fn test_install_prefers_free_way() {
    let mut store = LineCacheStore::new(GEOMETRY, ReplacementPolicy::Lru);
    assert!(store.install(in_set(1, 0), line(MesiState::Shared, 1)).is_none());
    assert!(store.install(in_set(1, 1), line(MesiState::Exclusive, 2)).is_none());
    assert_eq!(store.get(in_set(1, 0)).map(|l| l.data), Some(1));
    assert_eq!(store.get(in_set(1, 1)).map(|l| l.state), Some(MesiState::Exclusive));
    assert_eq!(store.lines().count(), 2);
}

#[test]
fn test_install_displaces_lru_victim() {
    let mut store = LineCacheStore::new(GEOMETRY, ReplacementPolicy::Lru);
    let _ = store.install(in_set(2, 0), line(MesiState::Modified, 10));
    let _ = store.install(in_set(2, 1), line(MesiState::Shared, 11));
    // Touch the older line so the newer one becomes least recently used.
    let _ = store.get_mut(in_set(2, 0));

    let (victim, old) = store.install(in_set(2, 2), line(MesiState::Shared, 12)).unwrap();
    assert_eq!(victim, in_set(2, 1));
    assert_eq!(old.data, 11);
    assert!(store.get(in_set(2, 1)).is_none());
    assert!(store.get(in_set(2, 0)).is_some());
}

#[test]
fn test_reinstall_overwrites_in_place() {
    let mut store = LineCacheStore::new(GEOMETRY, ReplacementPolicy::Fifo);
    let _ = store.install(in_set(0, 0), line(MesiState::Shared, 1));
    let _ = store.install(in_set(0, 1), line(MesiState::Shared, 2));
    assert!(store.install(in_set(0, 0), line(MesiState::Modified, 3)).is_none());
    assert_eq!(store.get(in_set(0, 0)).map(|l| l.data), Some(3));
}

#[test]
fn test_modified_line_needs_writeback() {
    assert!(line(MesiState::Modified, 0).needs_writeback());
    assert!(!line(MesiState::Exclusive, 0).needs_writeback());
    let mut dirty = line(MesiState::Shared, 0);
    dirty.dirty = true;
    assert!(dirty.needs_writeback());
}

#[test]
fn test_remove_and_clear() {
    let mut store = LineCacheStore::new(GEOMETRY, ReplacementPolicy::Random);
    let _ = store.install(in_set(0, 0), line(MesiState::Shared, 7));
    assert_eq!(store.remove(in_set(0, 0)).map(|l| l.data), Some(7));
    assert!(store.remove(in_set(0, 0)).is_none());
    let _ = store.install(in_set(1, 0), line(MesiState::Shared, 8));
    store.clear();
    assert_eq!(store.lines().count(), 0);
}

// ──────────────────────────────────────────────────────────
// Policies
// ──────────────────────────────────────────────────────────

#[test]
fn test_lru_victim_is_least_recent() {
    let mut lru = LruPolicy::new(1, 4);
    for way in [0, 1, 2, 3, 0, 2] {
        lru.touch(0, way);
    }
    assert_eq!(lru.victim(0), 1);
}

#[test]
fn test_fifo_replaces_in_fill_order() {
    let mut fifo = FifoPolicy::new(1, 3);
    for way in 0..3 {
        assert_eq!(fifo.victim(0), way);
        fifo.touch(0, way);
    }
    assert_eq!(fifo.victim(0), 0);
}

#[test]
fn test_random_stays_in_range() {
    let mut random = RandomPolicy::new(3);
    assert!((0..100).all(|_| random.victim(0) < 3));
}

#[test]
fn test_build_honours_selection() {
    let mut policy = policies::build(ReplacementPolicy::Fifo, 2, 2);
    policy.touch(1, 0);
    assert_eq!(policy.victim(1), 1);
    assert_eq!(policy.victim(0), 0);
}

// ──────────────────────────────────────────────────────────
// Sharer list and directory store
// ──────────────────────────────────────────────────────────

#[test]
fn test_sharer_list_slots() {
    let mut list = SharerList::new(2);
    assert!(list.is_empty());
    assert_eq!(list.insert(NodeId(3)), Some(0));
    assert_eq!(list.insert(NodeId(7)), Some(1));
    assert_eq!(list.insert(NodeId(3)), Some(0));
    assert!(list.is_full());
    assert_eq!(list.insert(NodeId(4)), None);

    assert_eq!(list.remove(NodeId(3)), Some(0));
    assert_eq!(list.first_free(), Some(0));
    assert_eq!(list.sole(), Some(NodeId(7)));
    assert_eq!(list.occupied_mask(), 0b10);
    assert!(list.insert_at(0, NodeId(4)));
    assert!(!list.insert_at(1, NodeId(5)));
    assert!(!list.insert_at(2, NodeId(5)));
    assert_eq!(list.iter().collect::<Vec<_>>(), vec![(0, NodeId(4)), (1, NodeId(7))]);
    assert_eq!(list.without(NodeId(7)).count(), 1);
}

#[test]
fn test_class_derivation() {
    let mut entry = DirectoryLine::new(4);
    assert_eq!(entry.class(), MesiState::Invalid);
    let _ = entry.sharers.insert(NodeId(1));
    assert_eq!(entry.class(), MesiState::Exclusive);
    entry.modified = true;
    assert_eq!(entry.class(), MesiState::Modified);
    entry.modified = false;
    let _ = entry.sharers.insert(NodeId(2));
    assert_eq!(entry.class(), MesiState::Shared);
}

#[test]
fn test_directory_update_frees_empty_entry() {
    let mut dir = SharerDirectoryStore::new(GEOMETRY, ReplacementPolicy::Lru, 2);
    let addr = in_set(0, 0);
    let Lookup::Miss { way, victim: None } = dir.lookup(addr) else {
        panic!("empty directory must miss without a victim");
    };
    let mut entry = DirectoryLine::new(dir.sharer_slots());
    let _ = entry.sharers.insert(NodeId(1));
    dir.write(addr, way, entry);

    assert!(dir.lookup(addr).is_hit());
    assert!(dir.update(addr, |l| l.modified = true));
    assert!(dir.get(addr).is_some_and(|l| l.modified));

    assert!(dir.update(addr, |l| {
        let _ = l.sharers.remove(NodeId(1));
    }));
    assert!(dir.get(addr).is_none());
    assert!(!dir.update(addr, |_| {}));
    assert_eq!(dir.port_a_accesses, 2);
}

#[test]
fn test_directory_reports_capacity_victim() {
    let geometry = Geometry {
        sets: 1,
        ways: 1,
        line_bytes: 64,
    };
    let mut dir = SharerDirectoryStore::new(geometry, ReplacementPolicy::Lru, 2);
    let mut entry = DirectoryLine::new(2);
    let _ = entry.sharers.insert(NodeId(5));
    dir.write(BlockAddr(0x100), 0, entry);

    match dir.lookup(BlockAddr(0x200)) {
        Lookup::Miss {
            way: 0,
            victim: Some((victim, line)),
        } => {
            assert_eq!(victim, BlockAddr(0x100));
            assert_eq!(line.sharers.sole(), Some(NodeId(5)));
        }
        other => panic!("expected a capacity victim, got {other:?}"),
    }
    assert_eq!(dir.reread(BlockAddr(0x100)).map(|l| l.sharers.count()), Some(1));
    assert_eq!(dir.port_b_accesses, 1);
}
