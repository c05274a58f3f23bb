//! Query facade
//!
//! The only surface the API layer talks to. Each call loads the current
//! snapshot reference once and serves the whole query from it, so results
//! within one call are mutually consistent and ingestion never blocks or
//! perturbs a reader.
//!
//! The facade returns raw domain values; formatting belongs to callers.
//! IX membership data is not computed here: it is passed through to an
//! injected collaborator.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::addr::AddressFamily;
use crate::index::{AllocationBlock, PrefixRecord};
use crate::snapshot::{SnapshotStats, SnapshotStore};

// =============================================================================
// IX membership pass-through
// =============================================================================

/// One internet-exchange membership of an ASN, as reported by the
/// external IX bookkeeping collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IxMembership {
    pub ix_id: u32,
    pub ix_name: String,
    pub ipv4_address: Option<IpAddr>,
    pub ipv6_address: Option<IpAddr>,
    /// Port speed in Mbps, when reported
    pub speed: Option<u32>,
}

/// External source of IX membership data. The engine never derives this
/// itself.
pub trait IxMembershipProvider: Send + Sync {
    fn memberships_of(&self, asn: u32) -> Vec<IxMembership>;
}

/// Default provider: no IX data wired up, every ASN has no memberships
#[derive(Debug, Default)]
pub struct NoIxData;

impl IxMembershipProvider for NoIxData {
    fn memberships_of(&self, _asn: u32) -> Vec<IxMembership> {
        Vec::new()
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Combined answer for one IP address
#[derive(Debug, Clone, Serialize)]
pub struct IpReport {
    pub ip: IpAddr,
    /// Most specific BGP-advertised prefix covering the address, if any
    pub prefix: Option<PrefixRecord>,
    /// RIR allocation block covering the address, if any
    pub allocation: Option<AllocationBlock>,
    /// Build time of the snapshot that answered
    pub snapshot_built_at: DateTime<Utc>,
}

/// Combined answer for one ASN
#[derive(Debug, Clone, Serialize)]
pub struct AsnReport {
    pub asn: u32,
    pub peers: Vec<u32>,
    pub upstreams: Vec<u32>,
    pub prefixes: Vec<PrefixRecord>,
    pub ix_memberships: Vec<IxMembership>,
    pub snapshot_built_at: DateTime<Utc>,
}

// =============================================================================
// Engine
// =============================================================================

/// Stateless dispatcher over the current snapshot
pub struct Engine {
    store: Arc<SnapshotStore>,
    ix_provider: Box<dyn IxMembershipProvider>,
}

impl Engine {
    pub fn new(store: Arc<SnapshotStore>) -> Self {
        Engine {
            store,
            ix_provider: Box::new(NoIxData),
        }
    }

    /// Wire up an external IX membership collaborator
    pub fn with_ix_provider(mut self, provider: Box<dyn IxMembershipProvider>) -> Self {
        self.ix_provider = provider;
        self
    }

    /// The store this engine reads from
    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Stats of the snapshot currently serving
    pub fn snapshot_stats(&self) -> SnapshotStats {
        self.store.current().stats()
    }

    /// Longest-prefix-match: the most specific BGP-advertised prefix
    /// covering the address. `None` means no route, not an error.
    pub fn resolve_prefix(&self, ip: &IpAddr) -> Option<PrefixRecord> {
        let snapshot = self.store.current();
        snapshot.trie(AddressFamily::of(ip)).lookup(ip).cloned()
    }

    /// The RIR allocation block covering the address, `None` when the
    /// address falls in unallocated/reserved space
    pub fn resolve_allocation(&self, ip: &IpAddr) -> Option<AllocationBlock> {
        self.store.current().allocations.lookup(ip).cloned()
    }

    /// Observed peers of an ASN; empty for an unknown ASN
    pub fn peers_of(&self, asn: u32) -> Vec<u32> {
        self.store.current().graph.peers_of(asn)
    }

    /// Inferred upstreams of an ASN; empty for an unknown ASN
    pub fn upstreams_of(&self, asn: u32) -> Vec<u32> {
        self.store.current().graph.upstreams_of(asn)
    }

    /// Prefixes originated by an ASN; empty for an unknown ASN
    pub fn prefixes_of(&self, asn: u32) -> Vec<PrefixRecord> {
        self.store.current().graph.prefixes_of(asn).to_vec()
    }

    /// Pass-through to the IX membership collaborator
    pub fn ix_memberships_of(&self, asn: u32) -> Vec<IxMembership> {
        self.ix_provider.memberships_of(asn)
    }

    /// Combined prefix + allocation answer for one address, served from a
    /// single snapshot reference
    pub fn resolve_ip(&self, ip: &IpAddr) -> IpReport {
        let snapshot = self.store.current();
        IpReport {
            ip: *ip,
            prefix: snapshot.trie(AddressFamily::of(ip)).lookup(ip).cloned(),
            allocation: snapshot.allocations.lookup(ip).cloned(),
            snapshot_built_at: snapshot.built_at,
        }
    }

    /// Combined relationship answer for one ASN, served from a single
    /// snapshot reference
    pub fn describe_asn(&self, asn: u32) -> AsnReport {
        let snapshot = self.store.current();
        AsnReport {
            asn,
            peers: snapshot.graph.peers_of(asn),
            upstreams: snapshot.graph.upstreams_of(asn),
            prefixes: snapshot.graph.prefixes_of(asn).to_vec(),
            ix_memberships: self.ix_provider.memberships_of(asn),
            snapshot_built_at: snapshot.built_at,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
