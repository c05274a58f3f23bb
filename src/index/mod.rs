//! Index structures built once per ingestion cycle
//!
//! - [`trie`]: longest-prefix-match index over BGP-advertised prefixes
//! - [`allocation`]: binary-search interval index over RIR delegations
//! - [`graph`]: AS-path-derived peer/upstream adjacency
//!
//! All three are immutable after build and live together in a
//! [`crate::snapshot::Snapshot`].

pub mod allocation;
pub mod graph;
pub mod trie;

pub use allocation::{AllocationBlock, AllocationIndex, Rir};
pub use graph::{clean_as_path, AsGraph};
pub use trie::{PrefixRecord, PrefixTrie};
