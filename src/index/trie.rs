//! Prefix trie index
//!
//! A binary (one bit per level) trie over address bits, one instance per
//! address family, supporting insert-with-prefix-length at build time and
//! longest-prefix-match lookup afterwards. Nodes live in an arena `Vec`
//! and reference each other by index, so the structure is compact and
//! drop does not recurse through pointer chains.
//!
//! The trie is built once per ingestion cycle and carries no mutation
//! API after `build` returns, which makes it safe to share across
//! concurrent readers without synchronization.
//!
//! Lookup cost is bounded by the address bit width (32 or 128 steps),
//! independent of table size.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::addr::{self, AddressFamily};

// =============================================================================
// Types
// =============================================================================

/// One BGP-advertised prefix as stored in the trie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixRecord {
    /// The advertised prefix, canonical form (host bits zero)
    pub prefix: IpNet,
    /// Origin ASN of the announcement
    pub origin_asn: u32,
    /// Unix timestamp of the source snapshot line that produced this record
    pub seen_at: i64,
}

impl PrefixRecord {
    pub fn new(prefix: IpNet, origin_asn: u32, seen_at: i64) -> Self {
        Self {
            prefix: prefix.trunc(),
            origin_asn,
            seen_at,
        }
    }

    /// Whether this prefix covers the given address
    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.prefix.contains(addr)
    }
}

/// Arena node: two child slots plus an optional stored record
#[derive(Debug, Clone, Default)]
struct TrieNode {
    children: [Option<u32>; 2],
    record: Option<u32>,
}

/// Immutable longest-prefix-match index over one address family
#[derive(Debug)]
pub struct PrefixTrie {
    family: AddressFamily,
    nodes: Vec<TrieNode>,
    records: Vec<PrefixRecord>,
}

// =============================================================================
// Build and lookup
// =============================================================================

impl PrefixTrie {
    /// Build a trie from a sequence of prefix records.
    ///
    /// Records of the wrong family are ignored. Duplicate announcements
    /// of the same (base, length) are resolved last-write-wins: the
    /// record with the newer `seen_at` is kept, and on equal timestamps
    /// the later-inserted record wins.
    pub fn build(family: AddressFamily, input: impl IntoIterator<Item = PrefixRecord>) -> Self {
        let mut trie = PrefixTrie {
            family,
            nodes: vec![TrieNode::default()],
            records: Vec::new(),
        };
        for record in input {
            if AddressFamily::of_net(&record.prefix) == family {
                trie.insert(record);
            }
        }
        trie
    }

    /// An empty trie for the given family
    pub fn empty(family: AddressFamily) -> Self {
        PrefixTrie::build(family, std::iter::empty())
    }

    fn insert(&mut self, record: PrefixRecord) {
        let (key, len) = addr::prefix_bits(&record.prefix);
        let mut node = 0usize;
        for i in 0..len {
            let branch = addr::key_bit(key, i) as usize;
            let existing = self.nodes[node].children[branch];
            node = match existing {
                Some(child) => child as usize,
                None => {
                    let child = self.nodes.len() as u32;
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].children[branch] = Some(child);
                    child as usize
                }
            };
        }
        match self.nodes[node].record {
            Some(idx) => {
                // Last write wins; ties on seen_at go to the later insert.
                if record.seen_at >= self.records[idx as usize].seen_at {
                    self.records[idx as usize] = record;
                }
            }
            None => {
                self.nodes[node].record = Some(self.records.len() as u32);
                self.records.push(record);
            }
        }
    }

    /// Longest-prefix-match lookup.
    ///
    /// Walks the trie from the most significant address bit, recording
    /// the deepest node that stores a prefix. Returns `None` when no
    /// stored prefix covers the address (no BGP route) or the address
    /// belongs to the other family.
    pub fn lookup(&self, addr: &IpAddr) -> Option<&PrefixRecord> {
        if AddressFamily::of(addr) != self.family {
            return None;
        }
        let (key, bits) = addr::addr_bits(addr);
        let mut node = 0usize;
        let mut best = self.nodes[0].record;
        for i in 0..bits {
            let branch = addr::key_bit(key, i) as usize;
            match self.nodes[node].children[branch] {
                Some(child) => {
                    node = child as usize;
                    if let Some(idx) = self.nodes[node].record {
                        best = Some(idx);
                    }
                }
                None => break,
            }
        }
        best.map(|idx| &self.records[idx as usize])
    }

    /// Address family this trie indexes
    pub fn family(&self) -> AddressFamily {
        self.family
    }

    /// Number of distinct stored prefixes
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All stored prefixes, post-deduplication. Feeds the per-ASN prefix
    /// map built alongside the trie.
    pub fn records(&self) -> &[PrefixRecord] {
        &self.records
    }
}

// =============================================================================
// Tests
// =============================================================================
