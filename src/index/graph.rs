//! AS relationship graph
//!
//! Adjacency structure derived from the AS paths observed in a BGP table
//! snapshot. Every adjacent pair of ASNs on a cleaned path is recorded as
//! a symmetric peer edge; the ASN immediately preceding the path's origin
//! is additionally recorded as an upstream of the origin (directional:
//! the origin is the customer). This is the conventional inference from
//! vantage-point paths, not an authoritative relationship database.
//!
//! An ASN→prefixes map is built alongside from the deduplicated trie
//! record lists, so `prefixes_of` is a map hit rather than a trie walk.

use std::collections::{HashMap, HashSet};

use crate::index::trie::PrefixRecord;

// =============================================================================
// Path cleaning
// =============================================================================

/// Collapse AS-path prepending (consecutive duplicate ASNs).
///
/// `701 3356 3356 3356 65001` announces the same adjacency three times;
/// only the distinct hop sequence matters for relationship inference.
pub fn clean_as_path(path: &[u32]) -> Vec<u32> {
    let mut cleaned: Vec<u32> = Vec::with_capacity(path.len());
    for &asn in path {
        if cleaned.last() != Some(&asn) {
            cleaned.push(asn);
        }
    }
    cleaned
}

// =============================================================================
// Graph
// =============================================================================

/// Peer/upstream adjacency plus per-origin prefix lists
#[derive(Debug, Default)]
pub struct AsGraph {
    peers: HashMap<u32, HashSet<u32>>,
    upstreams: HashMap<u32, HashSet<u32>>,
    prefixes: HashMap<u32, Vec<PrefixRecord>>,
}

impl AsGraph {
    /// Build the graph from (prefix, AS path) pairs observed in a table
    /// dump. Paths are cleaned of prepending first; single-hop paths
    /// contribute no edges.
    pub fn build<'a>(paths: impl IntoIterator<Item = &'a [u32]>) -> Self {
        let mut graph = AsGraph::default();
        for path in paths {
            let path = clean_as_path(path);
            if path.len() < 2 {
                continue;
            }
            for pair in path.windows(2) {
                graph.peers.entry(pair[0]).or_default().insert(pair[1]);
                graph.peers.entry(pair[1]).or_default().insert(pair[0]);
            }
            // The hop one closer to the vantage point than the origin.
            let origin = path[path.len() - 1];
            let predecessor = path[path.len() - 2];
            graph.upstreams.entry(origin).or_default().insert(predecessor);
        }
        graph
    }

    /// Attach per-origin prefix lists sourced from the tries' record sets
    pub fn with_prefixes<'a>(
        mut self,
        records: impl IntoIterator<Item = &'a PrefixRecord>,
    ) -> Self {
        for record in records {
            self.prefixes
                .entry(record.origin_asn)
                .or_default()
                .push(record.clone());
        }
        for list in self.prefixes.values_mut() {
            list.sort_by_key(|r| (r.prefix.addr(), r.prefix.prefix_len()));
        }
        self
    }

    /// Observed peers of an ASN, sorted. Empty for an unknown ASN.
    pub fn peers_of(&self, asn: u32) -> Vec<u32> {
        let mut peers: Vec<u32> = self
            .peers
            .get(&asn)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        peers.sort_unstable();
        peers
    }

    /// Inferred upstreams of an ASN, sorted. Empty for an unknown ASN.
    pub fn upstreams_of(&self, asn: u32) -> Vec<u32> {
        let mut upstreams: Vec<u32> = self
            .upstreams
            .get(&asn)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        upstreams.sort_unstable();
        upstreams
    }

    /// Prefixes originated by an ASN. Empty for an unknown ASN.
    pub fn prefixes_of(&self, asn: u32) -> &[PrefixRecord] {
        self.prefixes.get(&asn).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of ASNs with at least one peer edge
    pub fn asn_count(&self) -> usize {
        self.peers.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_as_path() {
        assert_eq!(
            clean_as_path(&[701, 3356, 3356, 3356, 65001]),
            vec![701, 3356, 65001]
        );
        assert_eq!(clean_as_path(&[701]), vec![701]);
        assert_eq!(clean_as_path(&[]), Vec::<u32>::new());
        // Non-consecutive repeats are kept (path poisoning aside, they
        // are distinct adjacencies).
        assert_eq!(clean_as_path(&[1, 2, 1]), vec![1, 2, 1]);
    }

    #[test]
    fn test_peers_are_symmetric() {
        let paths: Vec<Vec<u32>> = vec![vec![701, 3356, 65001]];
        let graph = AsGraph::build(paths.iter().map(Vec::as_slice));

        assert_eq!(graph.peers_of(3356), vec![701, 65001]);
        assert_eq!(graph.peers_of(701), vec![3356]);
        assert_eq!(graph.peers_of(65001), vec![3356]);
    }

    #[test]
    fn test_upstream_is_origin_predecessor() {
        let paths: Vec<Vec<u32>> = vec![vec![701, 3356, 65001], vec![174, 2914, 65001]];
        let graph = AsGraph::build(paths.iter().map(Vec::as_slice));

        assert_eq!(graph.upstreams_of(65001), vec![2914, 3356]);
        // Directional: the transit AS gains no upstream from these paths
        // beyond its own predecessors as origin, which never occur here.
        assert!(graph.upstreams_of(3356).is_empty());
    }

    #[test]
    fn test_prepending_collapsed() {
        let paths: Vec<Vec<u32>> = vec![vec![701, 65001, 65001, 65001]];
        let graph = AsGraph::build(paths.iter().map(Vec::as_slice));

        assert_eq!(graph.upstreams_of(65001), vec![701]);
        assert_eq!(graph.peers_of(65001), vec![701]);
    }

    #[test]
    fn test_absent_asn_is_empty_not_error() {
        let graph = AsGraph::default();
        assert!(graph.peers_of(65000).is_empty());
        assert!(graph.upstreams_of(65000).is_empty());
        assert!(graph.prefixes_of(65000).is_empty());
    }

    #[test]
    fn test_prefixes_of() {
        let records = vec![
            PrefixRecord::new("10.1.0.0/16".parse().unwrap(), 65001, 0),
            PrefixRecord::new("10.0.0.0/8".parse().unwrap(), 65001, 0),
            PrefixRecord::new("192.168.0.0/16".parse().unwrap(), 65002, 0),
        ];
        let graph = AsGraph::default().with_prefixes(records.iter());

        let mine = graph.prefixes_of(65001);
        assert_eq!(mine.len(), 2);
        assert_eq!(mine[0].prefix.to_string(), "10.0.0.0/8");
        assert_eq!(graph.prefixes_of(65002).len(), 1);
    }

    #[test]
    fn test_single_hop_path_no_edges() {
        let paths: Vec<Vec<u32>> = vec![vec![65001]];
        let graph = AsGraph::build(paths.iter().map(Vec::as_slice));
        assert!(graph.peers_of(65001).is_empty());
        assert!(graph.upstreams_of(65001).is_empty());
    }
}
