//! Snapshot bundle and the current-snapshot store
//!
//! A [`Snapshot`] is the immutable bundle of every index built from one
//! ingestion cycle. Exactly one snapshot is current at any instant; the
//! [`SnapshotStore`] holds it behind an `ArcSwap`, so publication is a
//! single atomic pointer replacement and readers load the pointer without
//! taking any lock.
//!
//! A reader's `Arc<Snapshot>` stays valid for as long as it is held, so a
//! query observes one internally consistent snapshot for its whole
//! lifetime regardless of concurrent publication. The superseded snapshot
//! is freed when the last in-flight reader drops its reference.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::addr::AddressFamily;
use crate::index::{AllocationIndex, AsGraph, PrefixTrie};

// =============================================================================
// Snapshot
// =============================================================================

/// Immutable bundle of all lookup indexes as of one ingestion cycle
#[derive(Debug)]
pub struct Snapshot {
    pub v4_trie: PrefixTrie,
    pub v6_trie: PrefixTrie,
    pub allocations: AllocationIndex,
    pub graph: AsGraph,
    pub built_at: DateTime<Utc>,
}

/// Summary counts of a snapshot, for logging and validation
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStats {
    pub v4_prefixes: usize,
    pub v6_prefixes: usize,
    pub v4_allocations: usize,
    pub v6_allocations: usize,
    pub asn_count: usize,
    pub built_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(
        v4_trie: PrefixTrie,
        v6_trie: PrefixTrie,
        allocations: AllocationIndex,
        graph: AsGraph,
    ) -> Self {
        Snapshot {
            v4_trie,
            v6_trie,
            allocations,
            graph,
            built_at: Utc::now(),
        }
    }

    /// The snapshot served before the first successful ingestion: every
    /// lookup misses, nothing errors.
    pub fn empty() -> Self {
        Snapshot::new(
            PrefixTrie::empty(AddressFamily::Ipv4),
            PrefixTrie::empty(AddressFamily::Ipv6),
            AllocationIndex::default(),
            AsGraph::default(),
        )
    }

    /// The trie for the given family
    pub fn trie(&self, family: AddressFamily) -> &PrefixTrie {
        match family {
            AddressFamily::Ipv4 => &self.v4_trie,
            AddressFamily::Ipv6 => &self.v6_trie,
        }
    }

    pub fn stats(&self) -> SnapshotStats {
        SnapshotStats {
            v4_prefixes: self.v4_trie.len(),
            v6_prefixes: self.v6_trie.len(),
            v4_allocations: self.allocations.len(AddressFamily::Ipv4),
            v6_allocations: self.allocations.len(AddressFamily::Ipv6),
            asn_count: self.graph.asn_count(),
            built_at: self.built_at,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Holder of the single shared "current snapshot" reference.
///
/// Written only by the snapshot manager, read by all query tasks.
#[derive(Debug)]
pub struct SnapshotStore {
    current: ArcSwap<Snapshot>,
}

impl SnapshotStore {
    /// A store starting from the empty snapshot
    pub fn new() -> Self {
        SnapshotStore {
            current: ArcSwap::from_pointee(Snapshot::empty()),
        }
    }

    pub fn with_initial(snapshot: Snapshot) -> Self {
        SnapshotStore {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// Load the current snapshot. The returned `Arc` is the caller's
    /// stable reference for the duration of one query.
    pub fn current(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Atomically replace the current snapshot. The old one is dropped
    /// once the last outstanding reader releases it.
    pub fn publish(&self, snapshot: Snapshot) {
        self.current.store(Arc::new(snapshot));
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        SnapshotStore::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{AllocationBlock, PrefixRecord, Rir};

    fn small_snapshot(asn: u32) -> Snapshot {
        let v4 = PrefixTrie::build(
            AddressFamily::Ipv4,
            vec![PrefixRecord::new("10.0.0.0/8".parse().unwrap(), asn, 0)],
        );
        let allocations = AllocationIndex::build(vec![AllocationBlock::new(
            "10.0.0.0/8".parse().unwrap(),
            Rir::Arin,
            "US",
            None,
        )]);
        Snapshot::new(
            v4,
            PrefixTrie::empty(AddressFamily::Ipv6),
            allocations,
            AsGraph::default(),
        )
    }

    #[test]
    fn test_empty_snapshot_misses_everything() {
        let snapshot = Snapshot::empty();
        let addr = "10.0.0.1".parse().unwrap();
        assert!(snapshot.v4_trie.lookup(&addr).is_none());
        assert!(snapshot.allocations.lookup(&addr).is_none());
        assert!(snapshot.graph.peers_of(65001).is_empty());
    }

    #[test]
    fn test_publish_replaces_current() {
        let store = SnapshotStore::new();
        assert_eq!(store.current().stats().v4_prefixes, 0);

        store.publish(small_snapshot(100));
        assert_eq!(store.current().stats().v4_prefixes, 1);
    }

    #[test]
    fn test_reader_reference_survives_publish() {
        let store = SnapshotStore::new();
        store.publish(small_snapshot(100));

        let held = store.current();
        store.publish(small_snapshot(200));

        // The in-flight reader still observes its original snapshot.
        let addr = "10.1.1.1".parse().unwrap();
        assert_eq!(held.v4_trie.lookup(&addr).unwrap().origin_asn, 100);
        assert_eq!(store.current().v4_trie.lookup(&addr).unwrap().origin_asn, 200);
    }

    #[test]
    fn test_stats() {
        let stats = small_snapshot(100).stats();
        assert_eq!(stats.v4_prefixes, 1);
        assert_eq!(stats.v6_prefixes, 0);
        assert_eq!(stats.v4_allocations, 1);
    }
}
