//! Allocation block index
//!
//! Point-lookup index over RIR-delegated address blocks. Delegation files
//! yield non-overlapping blocks, so a per-family array sorted by base
//! address with binary-search lookup is sufficient; no trie is needed
//! here. An address either falls inside exactly one block or into a gap
//! (unallocated/reserved space).

use std::net::IpAddr;

use chrono::NaiveDate;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::addr::{self, AddressFamily};

// =============================================================================
// Types
// =============================================================================

/// Regional Internet Registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rir {
    Afrinic,
    Apnic,
    Arin,
    Lacnic,
    RipeNcc,
}

impl Rir {
    /// Registry identifier as it appears in delegation files
    pub fn from_registry(s: &str) -> Option<Rir> {
        match s.to_lowercase().as_str() {
            "afrinic" => Some(Rir::Afrinic),
            "apnic" => Some(Rir::Apnic),
            "arin" => Some(Rir::Arin),
            "lacnic" => Some(Rir::Lacnic),
            "ripencc" | "ripe-ncc" | "ripe" => Some(Rir::RipeNcc),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Rir::Afrinic => "AfriNIC",
            Rir::Apnic => "APNIC",
            Rir::Arin => "ARIN",
            Rir::Lacnic => "LACNIC",
            Rir::RipeNcc => "RIPE NCC",
        }
    }
}

impl std::fmt::Display for Rir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One RIR-delegated address block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationBlock {
    /// The delegated block, canonical form
    pub prefix: IpNet,
    /// Registry that delegated the block
    pub rir: Rir,
    /// ISO country code from the delegation row
    pub country: String,
    /// Date the block was allocated or assigned, when present
    pub allocated_on: Option<NaiveDate>,
}

impl AllocationBlock {
    pub fn new(
        prefix: IpNet,
        rir: Rir,
        country: impl Into<String>,
        allocated_on: Option<NaiveDate>,
    ) -> Self {
        Self {
            prefix: prefix.trunc(),
            rir,
            country: country.into(),
            allocated_on,
        }
    }

    pub fn contains(&self, addr: &IpAddr) -> bool {
        self.prefix.contains(addr)
    }

    /// Number of addresses the block covers
    pub fn size(&self) -> u128 {
        let span = AddressFamily::of_net(&self.prefix).bits() - self.prefix.prefix_len();
        1u128 << span.min(127)
    }
}

// =============================================================================
// Index
// =============================================================================

/// Sorted entry: left-aligned base key plus the block itself
#[derive(Debug, Clone)]
struct Entry {
    base: u128,
    block: AllocationBlock,
}

/// Binary-search point-lookup index over non-overlapping blocks
#[derive(Debug, Default)]
pub struct AllocationIndex {
    v4: Vec<Entry>,
    v6: Vec<Entry>,
}

impl AllocationIndex {
    /// Build the index from delegation blocks.
    ///
    /// Blocks are sorted by base address per family; a block whose base
    /// falls inside an already-kept block is dropped (delegation files
    /// occasionally repeat a row), keeping the first occurrence.
    pub fn build(blocks: impl IntoIterator<Item = AllocationBlock>) -> Self {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();
        for block in blocks {
            let (base, _) = addr::prefix_bits(&block.prefix);
            let entry = Entry { base, block };
            match AddressFamily::of_net(&entry.block.prefix) {
                AddressFamily::Ipv4 => v4.push(entry),
                AddressFamily::Ipv6 => v6.push(entry),
            }
        }
        for list in [&mut v4, &mut v6] {
            list.sort_by_key(|e| (e.base, e.block.prefix.prefix_len()));
            let mut kept: Vec<Entry> = Vec::with_capacity(list.len());
            for entry in list.drain(..) {
                let overlaps = kept
                    .last()
                    .is_some_and(|prev| prev.block.contains(&entry.block.prefix.addr()));
                if !overlaps {
                    kept.push(entry);
                }
            }
            *list = kept;
        }
        AllocationIndex { v4, v6 }
    }

    /// Find the block covering an address, if the address is allocated
    pub fn lookup(&self, addr: &IpAddr) -> Option<&AllocationBlock> {
        let list = match AddressFamily::of(addr) {
            AddressFamily::Ipv4 => &self.v4,
            AddressFamily::Ipv6 => &self.v6,
        };
        let (key, _) = addr::addr_bits(addr);
        // Last entry whose base is <= the queried address.
        let idx = list.partition_point(|e| e.base <= key);
        if idx == 0 {
            return None;
        }
        let candidate = &list[idx - 1].block;
        candidate.contains(addr).then_some(candidate)
    }

    /// Number of blocks indexed for a family
    pub fn len(&self, family: AddressFamily) -> usize {
        match family {
            AddressFamily::Ipv4 => self.v4.len(),
            AddressFamily::Ipv6 => self.v6.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }

    /// Total addresses covered for a family; input to the snapshot
    /// validation shrink heuristic
    pub fn coverage(&self, family: AddressFamily) -> u128 {
        let list = match family {
            AddressFamily::Ipv4 => &self.v4,
            AddressFamily::Ipv6 => &self.v6,
        };
        list.iter().map(|e| e.block.size()).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================
