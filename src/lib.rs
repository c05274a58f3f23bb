#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Periscope - an IP/ASN resolution engine
//!
//! Periscope answers "which BGP prefix, allocation block, and AS
//! relationships belong to this address or ASN" at predictable latency
//! over millions of routing entries, refreshed periodically from external
//! feeds. It can be used as a library or through the `periscope` CLI.
//!
//! # Architecture
//!
//! - **[`addr`]**: address parsing, family detection, binary keys
//! - **[`index`]**: the lookup structures built once per ingestion cycle
//!   - `trie`: longest-prefix-match over BGP-advertised prefixes
//!   - `allocation`: binary-search index over RIR-delegated blocks
//!   - `graph`: AS-path-derived peer/upstream adjacency
//! - **[`snapshot`]**: the immutable per-cycle bundle and the atomic
//!   current-snapshot store
//! - **[`ingest`]**: feed parsing and the fetch/build/validate/publish
//!   state machine
//! - **[`engine`]**: the query facade consumed by API layers
//! - **[`config`]**: TOML + environment configuration
//!
//! Reads and ingestion proceed concurrently without lock contention:
//! snapshots are immutable once built and publication is a single atomic
//! pointer replacement. A failed or rejected ingestion cycle is never
//! visible to queries.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use periscope::engine::Engine;
//! use periscope::ingest::{Refresher, RefreshSettings};
//! use periscope::snapshot::SnapshotStore;
//!
//! let store = Arc::new(SnapshotStore::new());
//! let refresher = Refresher::new(Arc::clone(&store), RefreshSettings {
//!     bgp_dump: "./rib.latest.txt.bz2".to_string(),
//!     delegation_files: vec!["./delegated-ripencc-extended-latest".to_string()],
//!     ..RefreshSettings::default()
//! });
//! refresher.run_once()?;
//!
//! let engine = Engine::new(store);
//! let report = engine.resolve_ip(&"10.1.2.3".parse()?);
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

pub mod addr;
pub mod config;
pub mod engine;
pub mod errors;
pub mod index;
pub mod ingest;
pub mod snapshot;

pub use addr::AddressFamily;
pub use config::PeriscopeConfig;
pub use engine::{AsnReport, Engine, IpReport, IxMembership, IxMembershipProvider, NoIxData};
pub use errors::{EngineError, IngestStage};
pub use index::{AllocationBlock, AllocationIndex, AsGraph, PrefixRecord, PrefixTrie, Rir};
pub use ingest::{RefreshSettings, Refresher, RouteEntry};
pub use snapshot::{Snapshot, SnapshotStats, SnapshotStore};
