//! Ingestion: feed parsing and the snapshot manager
//!
//! [`feeds`] turns external BGP table dumps and RIR delegation files into
//! domain records; [`refresher`] orchestrates the periodic
//! fetch/build/validate/publish cycle against a
//! [`crate::snapshot::SnapshotStore`].

pub mod feeds;
pub mod refresher;

pub use feeds::{
    decompose_ipv4_range, fetch_with_deadline, parse_bgp_dump_line, parse_delegation_line,
    read_bgp_dump, read_delegation_file, RouteEntry,
};
pub use refresher::{build_snapshot, validate_snapshot, RefreshSettings, Refresher};
