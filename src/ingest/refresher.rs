//! Snapshot manager
//!
//! Drives the per-cycle state machine
//! `Idle -> Fetching -> Building -> Validating -> Publishing -> Idle`.
//!
//! Everything before Publishing happens off to the side of the published
//! snapshot: a failed or cancelled cycle leaves the previous snapshot
//! serving traffic and is therefore never user-visible. Once Publishing
//! starts it is a single atomic pointer store and always completes.
//!
//! The periodic driver retries failed cycles with exponential backoff and
//! honors a shutdown flag between stages and between cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::addr::AddressFamily;
use crate::errors::{EngineError, IngestStage};
use crate::index::{AllocationBlock, AllocationIndex, AsGraph, PrefixTrie};
use crate::ingest::feeds::{self, RouteEntry};
use crate::snapshot::{Snapshot, SnapshotStats, SnapshotStore};

// =============================================================================
// Settings
// =============================================================================

/// Everything one refresh cycle needs to know
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Location (path or URL) of the BGP table dump
    pub bgp_dump: String,
    /// Locations of the per-RIR delegation files
    pub delegation_files: Vec<String>,
    /// Deadline for the whole fetch stage
    pub fetch_deadline: Duration,
    /// Allowed per-family allocation-coverage shrink vs. the prior
    /// snapshot (0.9 = a 10% shrink is still accepted)
    pub shrink_threshold: f64,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        RefreshSettings {
            bgp_dump: String::new(),
            delegation_files: Vec::new(),
            fetch_deadline: Duration::from_secs(600),
            shrink_threshold: 0.9,
        }
    }
}

// =============================================================================
// Refresher
// =============================================================================

/// The single writer of the current-snapshot pointer
pub struct Refresher {
    store: Arc<SnapshotStore>,
    settings: RefreshSettings,
    shutdown: Arc<AtomicBool>,
}

impl Refresher {
    pub fn new(store: Arc<SnapshotStore>, settings: RefreshSettings) -> Self {
        Refresher {
            store,
            settings,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the periodic driver and cancels an in-progress
    /// cycle at the next stage boundary before Publishing
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn cancelled(&self, stage: IngestStage) -> Result<(), EngineError> {
        if self.shutdown.load(Ordering::Relaxed) {
            Err(EngineError::ingestion(stage, "cancelled by shutdown"))
        } else {
            Ok(())
        }
    }

    /// Run one full ingestion cycle.
    ///
    /// On success the new snapshot is published and its stats returned.
    /// On any failure the previously published snapshot remains
    /// authoritative.
    pub fn run_once(&self) -> Result<SnapshotStats, EngineError> {
        info!("refresh cycle starting: fetching");
        self.cancelled(IngestStage::Fetching)?;
        let (entries, blocks) = self.fetch()?;

        debug!(
            "fetched {} routes and {} allocation blocks",
            entries.len(),
            blocks.len()
        );
        self.cancelled(IngestStage::Building)?;
        let snapshot = build_snapshot(entries, blocks);

        self.cancelled(IngestStage::Validating)?;
        validate_snapshot(&snapshot, &self.store.current(), self.settings.shrink_threshold)?;

        // Publishing is a single atomic store; no cancellation point past
        // this line.
        let stats = snapshot.stats();
        self.store.publish(snapshot);
        info!(
            "published snapshot: {} ipv4 / {} ipv6 prefixes, {} / {} allocations, {} ASNs",
            stats.v4_prefixes,
            stats.v6_prefixes,
            stats.v4_allocations,
            stats.v6_allocations,
            stats.asn_count
        );
        Ok(stats)
    }

    fn fetch(&self) -> Result<(Vec<RouteEntry>, Vec<AllocationBlock>), EngineError> {
        let bgp_dump = self.settings.bgp_dump.clone();
        let delegation_files = self.settings.delegation_files.clone();
        feeds::fetch_with_deadline(self.settings.fetch_deadline, move || {
            let entries = feeds::read_bgp_dump(&bgp_dump)?;
            let mut blocks = Vec::new();
            for location in &delegation_files {
                blocks.extend(feeds::read_delegation_file(location)?);
            }
            Ok((entries, blocks))
        })
    }

    /// Periodic driver: one cycle per `period`, exponential backoff after
    /// failures (capped at `backoff_cap`), until the shutdown flag is set.
    pub fn run_periodic(&self, period: Duration, backoff_base: Duration, backoff_cap: Duration) {
        let mut backoff = backoff_base;
        while !self.shutdown.load(Ordering::Relaxed) {
            let wait = match self.run_once() {
                Ok(_) => {
                    backoff = backoff_base;
                    period
                }
                Err(e) => {
                    warn!("refresh cycle failed, previous snapshot retained: {}", e);
                    let wait = backoff;
                    backoff = (backoff * 2).min(backoff_cap);
                    wait
                }
            };
            interruptible_sleep(wait, &self.shutdown);
        }
        debug!("refresher stopped");
    }
}

/// Sleep in small slices so shutdown is honored promptly
fn interruptible_sleep(total: Duration, shutdown: &AtomicBool) {
    let slice = Duration::from_millis(50);
    let mut slept = Duration::ZERO;
    while slept < total && !shutdown.load(Ordering::Relaxed) {
        let step = slice.min(total - slept);
        std::thread::sleep(step);
        slept += step;
    }
}

// =============================================================================
// Building and validating
// =============================================================================

/// Assemble a snapshot from fetched feed data, entirely aside from the
/// currently published one
pub fn build_snapshot(entries: Vec<RouteEntry>, blocks: Vec<AllocationBlock>) -> Snapshot {
    let graph = AsGraph::build(entries.iter().map(|e| e.as_path.as_slice()));
    let records = entries.into_iter().map(|e| e.record);
    let (v4, v6): (Vec<_>, Vec<_>) =
        records.partition(|r| AddressFamily::of_net(&r.prefix) == AddressFamily::Ipv4);

    let v4_trie = PrefixTrie::build(AddressFamily::Ipv4, v4);
    let v6_trie = PrefixTrie::build(AddressFamily::Ipv6, v6);
    let graph = graph.with_prefixes(v4_trie.records().iter().chain(v6_trie.records()));
    let allocations = AllocationIndex::build(blocks);

    Snapshot::new(v4_trie, v6_trie, allocations, graph)
}

/// Sanity checks on a freshly built snapshot.
///
/// Rejects empty per-family routing tables and any large unexplained
/// shrink in allocation coverage relative to the snapshot currently
/// serving; a rejected snapshot is discarded and the old one retained.
pub fn validate_snapshot(
    new: &Snapshot,
    prior: &Snapshot,
    shrink_threshold: f64,
) -> Result<(), EngineError> {
    if new.v4_trie.is_empty() {
        return Err(EngineError::rejected("ipv4 prefix count is zero"));
    }
    if new.v6_trie.is_empty() {
        return Err(EngineError::rejected("ipv6 prefix count is zero"));
    }
    for family in [AddressFamily::Ipv4, AddressFamily::Ipv6] {
        let old = prior.allocations.coverage(family);
        let fresh = new.allocations.coverage(family);
        let floor = (old as f64 * shrink_threshold) as u128;
        if fresh < floor {
            return Err(EngineError::rejected(format!(
                "{} allocation coverage shrank from {} to {} addresses",
                family, old, fresh
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{PrefixRecord, Rir};
    use std::io::Write;

    fn entry(prefix: &str, path: &[u32]) -> RouteEntry {
        RouteEntry {
            record: PrefixRecord::new(prefix.parse().unwrap(), path[path.len() - 1], 0),
            as_path: path.to_vec(),
        }
    }

    fn block(prefix: &str) -> AllocationBlock {
        AllocationBlock::new(prefix.parse().unwrap(), Rir::Arin, "US", None)
    }

    fn dual_stack_entries() -> Vec<RouteEntry> {
        vec![
            entry("10.0.0.0/8", &[701, 100]),
            entry("10.1.0.0/16", &[701, 3356, 200]),
            entry("2001:db8::/32", &[701, 100]),
        ]
    }

    #[test]
    fn test_build_snapshot() {
        let snapshot = build_snapshot(
            dual_stack_entries(),
            vec![block("10.0.0.0/8"), block("2001:db8::/32")],
        );
        let stats = snapshot.stats();
        assert_eq!(stats.v4_prefixes, 2);
        assert_eq!(stats.v6_prefixes, 1);
        assert_eq!(stats.v4_allocations, 1);

        // Graph and per-ASN prefixes wired up from the same feed.
        assert_eq!(snapshot.graph.upstreams_of(200), vec![3356]);
        assert_eq!(snapshot.graph.prefixes_of(100).len(), 2);
    }

    #[test]
    fn test_validate_rejects_empty_family() {
        let empty = Snapshot::empty();
        let v4_only = build_snapshot(vec![entry("10.0.0.0/8", &[701, 100])], vec![]);
        let err = validate_snapshot(&v4_only, &empty, 0.9).unwrap_err();
        assert!(matches!(err, EngineError::SnapshotRejected { .. }));
        assert!(err.to_string().contains("ipv6"));
    }

    #[test]
    fn test_validate_rejects_coverage_shrink() {
        let prior = build_snapshot(
            dual_stack_entries(),
            vec![block("10.0.0.0/8"), block("11.0.0.0/8")],
        );
        let shrunk = build_snapshot(dual_stack_entries(), vec![block("10.0.0.0/16")]);
        let err = validate_snapshot(&shrunk, &prior, 0.9).unwrap_err();
        assert!(err.to_string().contains("coverage shrank"));

        // A fresh snapshot with equal coverage passes.
        let same = build_snapshot(
            dual_stack_entries(),
            vec![block("10.0.0.0/8"), block("11.0.0.0/8")],
        );
        assert!(validate_snapshot(&same, &prior, 0.9).is_ok());
    }

    #[test]
    fn test_validate_first_publish_against_empty() {
        let snapshot = build_snapshot(dual_stack_entries(), vec![block("10.0.0.0/8")]);
        assert!(validate_snapshot(&snapshot, &Snapshot::empty(), 0.9).is_ok());
    }

    fn write_feeds() -> (tempfile::NamedTempFile, tempfile::NamedTempFile) {
        let mut dump = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            dump,
            "TABLE_DUMP2|1650000000|B|203.0.113.1|64500|10.0.0.0/8|701 100|IGP"
        )
        .unwrap();
        writeln!(
            dump,
            "TABLE_DUMP2|1650000000|B|203.0.113.1|64500|10.1.0.0/16|701 3356 200|IGP"
        )
        .unwrap();
        writeln!(
            dump,
            "TABLE_DUMP2|1650000000|B|203.0.113.1|64500|2001:db8::/32|701 100|IGP"
        )
        .unwrap();
        dump.flush().unwrap();

        let mut delegations = tempfile::NamedTempFile::new().unwrap();
        writeln!(delegations, "arin|US|ipv4|10.0.0.0|16777216|19921201|allocated").unwrap();
        writeln!(delegations, "ripencc|NL|ipv6|2001:db8::|32|20040101|allocated").unwrap();
        delegations.flush().unwrap();

        (dump, delegations)
    }

    fn refresher_for(
        store: Arc<SnapshotStore>,
        dump: &tempfile::NamedTempFile,
        delegations: &tempfile::NamedTempFile,
    ) -> Refresher {
        Refresher::new(
            store,
            RefreshSettings {
                bgp_dump: dump.path().to_string_lossy().into_owned(),
                delegation_files: vec![delegations.path().to_string_lossy().into_owned()],
                fetch_deadline: Duration::from_secs(10),
                shrink_threshold: 0.9,
            },
        )
    }

    #[test]
    fn test_run_once_publishes() {
        let (dump, delegations) = write_feeds();
        let store = Arc::new(SnapshotStore::new());
        let refresher = refresher_for(Arc::clone(&store), &dump, &delegations);

        let stats = refresher.run_once().unwrap();
        assert_eq!(stats.v4_prefixes, 2);
        assert_eq!(stats.v6_prefixes, 1);

        let addr = "10.1.2.3".parse().unwrap();
        assert_eq!(store.current().v4_trie.lookup(&addr).unwrap().origin_asn, 200);
    }

    #[test]
    fn test_failed_fetch_leaves_snapshot_untouched() {
        let (dump, delegations) = write_feeds();
        let store = Arc::new(SnapshotStore::new());
        refresher_for(Arc::clone(&store), &dump, &delegations)
            .run_once()
            .unwrap();
        let before = store.current();

        let broken = Refresher::new(
            Arc::clone(&store),
            RefreshSettings {
                bgp_dump: "/nonexistent/dump.txt".to_string(),
                delegation_files: vec![],
                fetch_deadline: Duration::from_secs(5),
                shrink_threshold: 0.9,
            },
        );
        assert!(broken.run_once().is_err());

        // Identical results before and after the failed cycle.
        let addr = "10.1.2.3".parse().unwrap();
        assert!(Arc::ptr_eq(&before, &store.current()));
        assert_eq!(store.current().v4_trie.lookup(&addr).unwrap().origin_asn, 200);
    }

    #[test]
    fn test_shutdown_cancels_cycle() {
        let (dump, delegations) = write_feeds();
        let store = Arc::new(SnapshotStore::new());
        let refresher = refresher_for(Arc::clone(&store), &dump, &delegations);
        refresher.shutdown_handle().store(true, Ordering::Relaxed);

        let err = refresher.run_once().unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert_eq!(store.current().stats().v4_prefixes, 0);
    }

    #[test]
    fn test_concurrent_readers_never_see_partial_snapshot() {
        let (dump, delegations) = write_feeds();
        let store = Arc::new(SnapshotStore::new());
        let refresher = refresher_for(Arc::clone(&store), &dump, &delegations);
        refresher.run_once().unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            readers.push(std::thread::spawn(move || {
                let addr = "10.1.2.3".parse().unwrap();
                while !stop.load(Ordering::Relaxed) {
                    let snapshot = store.current();
                    // A snapshot is consistent as a whole: if the trie
                    // answers, the allocation index built from the same
                    // cycle answers too.
                    let prefix = snapshot.v4_trie.lookup(&addr);
                    let allocation = snapshot.allocations.lookup(&addr);
                    assert!(prefix.is_some());
                    assert!(allocation.is_some());
                    assert_eq!(prefix.map(|p| p.origin_asn), Some(200));
                }
            }));
        }

        // Republish repeatedly while readers hammer the store.
        for _ in 0..20 {
            refresher.run_once().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        for handle in readers {
            handle.join().unwrap();
        }
    }
}
