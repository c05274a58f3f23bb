//! Feed fetching and parsing
//!
//! Two external feeds drive the engine:
//!
//! - BGP table dumps in the pipe-separated `bgpdump -m` style
//!   (`TABLE_DUMP2|<ts>|B|<peer_ip>|<peer_asn>|<prefix>|<as path>|...`),
//!   one route per line.
//! - RIR extended delegation files
//!   (`registry|cc|type|start|value|date|status[|opaque-id]`).
//!
//! Both are read through `oneio`, so a location may be a local path or an
//! HTTP(S) URL, optionally gzip/bzip2-compressed. Individual malformed
//! lines are skipped with a debug log; only a completely unreadable feed
//! fails the cycle.

use std::net::Ipv4Addr;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use rayon::prelude::*;
use tracing::debug;

use crate::addr;
use crate::errors::{EngineError, IngestStage};
use crate::index::{AllocationBlock, PrefixRecord, Rir};

// =============================================================================
// Types
// =============================================================================

/// One route observation from a table dump: the advertised prefix plus
/// the AS path it arrived with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub record: PrefixRecord,
    pub as_path: Vec<u32>,
}

// =============================================================================
// BGP table dump
// =============================================================================

/// Parse one `bgpdump -m` style line into a route entry.
///
/// Returns `None` for anything unusable: too few fields, unparseable
/// prefix or timestamp, `/0` prefixes, empty paths, or an AS_SET in the
/// origin position (a set cannot name a single origin ASN).
pub fn parse_bgp_dump_line(line: &str) -> Option<RouteEntry> {
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 7 {
        return None;
    }
    let seen_at: i64 = fields[1].trim().parse().ok()?;
    let prefix = addr::parse_prefix(fields[5]).ok()?;
    if prefix.prefix_len() == 0 {
        return None;
    }

    let path_field = fields[6].trim();
    if path_field.is_empty() {
        return None;
    }
    let tokens: Vec<&str> = path_field.split_whitespace().collect();
    // AS_SET as the origin means the true origin is ambiguous.
    if tokens.last()?.starts_with('{') {
        return None;
    }
    let mut as_path: Vec<u32> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.starts_with('{') {
            // Aggregation artifact mid-path; the hops around it still
            // describe real adjacencies, the set members do not.
            continue;
        }
        as_path.push(token.parse().ok()?);
    }
    let origin_asn = *as_path.last()?;

    Some(RouteEntry {
        record: PrefixRecord::new(prefix, origin_asn, seen_at),
        as_path,
    })
}

/// Read and parse a whole table dump from a local path or URL
pub fn read_bgp_dump(location: &str) -> Result<Vec<RouteEntry>> {
    let reader = oneio::get_reader(location)
        .map_err(|e| anyhow!("cannot open BGP dump {}: {}", location, e))?;
    let lines: Vec<String> = std::io::BufRead::lines(std::io::BufReader::new(reader))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("error reading BGP dump {}", location))?;

    let total = lines.len();
    let entries: Vec<RouteEntry> = lines
        .par_iter()
        .filter_map(|line| parse_bgp_dump_line(line))
        .collect();
    debug!(
        "parsed {} routes from {} lines of {}",
        entries.len(),
        total,
        location
    );
    Ok(entries)
}

// =============================================================================
// RIR delegation files
// =============================================================================

/// Parse one extended-delegation row into allocation blocks.
///
/// IPv6 rows carry a prefix length directly and yield one block. IPv4
/// rows carry an address count; counts that are not a single aligned
/// power of two are CIDR-decomposed, so a row like `.. |8.8.0.0|12288|..`
/// becomes a /19 plus a /20. Header, summary, and non-allocated rows
/// yield nothing.
pub fn parse_delegation_line(line: &str) -> Vec<AllocationBlock> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Vec::new();
    }
    let fields: Vec<&str> = line.split('|').collect();
    if fields.len() < 7 {
        // Version header and per-type summary rows have fewer fields.
        return Vec::new();
    }
    let Some(rir) = Rir::from_registry(fields[0]) else {
        return Vec::new();
    };
    if !matches!(fields[6], "allocated" | "assigned") {
        return Vec::new();
    }
    let country = fields[1].to_string();
    let allocated_on = NaiveDate::parse_from_str(fields[5], "%Y%m%d").ok();

    match fields[2] {
        "ipv4" => {
            let Ok(start) = fields[3].parse::<Ipv4Addr>() else {
                debug!("skipping delegation row with bad ipv4 start: {}", line);
                return Vec::new();
            };
            let Ok(count) = fields[4].parse::<u64>() else {
                debug!("skipping delegation row with bad count: {}", line);
                return Vec::new();
            };
            decompose_ipv4_range(start, count)
                .into_iter()
                .map(|net| {
                    AllocationBlock::new(IpNet::V4(net), rir, country.clone(), allocated_on)
                })
                .collect()
        }
        "ipv6" => {
            let (Ok(start), Ok(len)) = (
                fields[3].parse::<std::net::Ipv6Addr>(),
                fields[4].parse::<u8>(),
            ) else {
                debug!("skipping delegation row with bad ipv6 block: {}", line);
                return Vec::new();
            };
            match Ipv6Net::new(start, len) {
                Ok(net) => vec![AllocationBlock::new(
                    IpNet::V6(net),
                    rir,
                    country,
                    allocated_on,
                )],
                Err(_) => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

/// Decompose `[start, start + count)` into maximal aligned CIDR blocks.
///
/// Delegation files routinely contain counts like 12288 that are not a
/// power of two; splitting keeps the index's non-overlap invariant and
/// the coverage arithmetic exact.
pub fn decompose_ipv4_range(start: Ipv4Addr, count: u64) -> Vec<Ipv4Net> {
    let mut blocks = Vec::new();
    let mut cursor = u32::from(start) as u64;
    let end = cursor.saturating_add(count).min(1 << 32);
    while cursor < end {
        let align = if cursor == 0 {
            1 << 32
        } else {
            1u64 << cursor.trailing_zeros()
        };
        let remaining = end - cursor;
        let size = align.min(1u64 << (63 - remaining.leading_zeros()));
        let len = 32 - size.trailing_zeros() as u8;
        if let Ok(net) = Ipv4Net::new(Ipv4Addr::from(cursor as u32), len) {
            blocks.push(net);
        }
        cursor += size;
    }
    blocks
}

/// Read and parse one delegation file from a local path or URL
pub fn read_delegation_file(location: &str) -> Result<Vec<AllocationBlock>> {
    let reader = oneio::get_reader(location)
        .map_err(|e| anyhow!("cannot open delegation file {}: {}", location, e))?;
    let lines: Vec<String> = std::io::BufRead::lines(std::io::BufReader::new(reader))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("error reading delegation file {}", location))?;

    let blocks: Vec<AllocationBlock> = lines
        .iter()
        .flat_map(|line| parse_delegation_line(line))
        .collect();
    debug!("parsed {} blocks from {}", blocks.len(), location);
    Ok(blocks)
}

// =============================================================================
// Deadline-bounded fetching
// =============================================================================

/// Run a blocking fetch on a worker thread, bounded by a deadline.
///
/// Exceeding the deadline aborts this cycle only; the worker is detached
/// and its late result is discarded.
pub fn fetch_with_deadline<T, F>(deadline: Duration, fetch: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // Receiver may be gone after a timeout; nothing to do then.
        let _ = tx.send(fetch());
    });
    match rx.recv_timeout(deadline) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(EngineError::ingestion(IngestStage::Fetching, e.to_string())),
        Err(_) => Err(EngineError::ingestion(
            IngestStage::Fetching,
            format!("fetch exceeded deadline of {:?}", deadline),
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_bgp_dump_line() {
        let line = "TABLE_DUMP2|1650000000|B|203.0.113.1|64500|10.1.0.0/16|701 3356 200|IGP|203.0.113.1|0|0||NAG||";
        let entry = parse_bgp_dump_line(line).unwrap();
        assert_eq!(entry.record.prefix.to_string(), "10.1.0.0/16");
        assert_eq!(entry.record.origin_asn, 200);
        assert_eq!(entry.record.seen_at, 1650000000);
        assert_eq!(entry.as_path, vec![701, 3356, 200]);
    }

    #[test]
    fn test_parse_bgp_dump_line_skips_malformed() {
        assert!(parse_bgp_dump_line("").is_none());
        assert!(parse_bgp_dump_line("TABLE_DUMP2|123|B").is_none());
        assert!(parse_bgp_dump_line("TABLE_DUMP2|x|B|1.1.1.1|1|10.0.0.0/8|1 2|").is_none());
        assert!(parse_bgp_dump_line("TABLE_DUMP2|123|B|1.1.1.1|1|not-a-prefix|1 2|").is_none());
        assert!(parse_bgp_dump_line("TABLE_DUMP2|123|B|1.1.1.1|1|0.0.0.0/0|1 2|").is_none());
        assert!(parse_bgp_dump_line("TABLE_DUMP2|123|B|1.1.1.1|1|10.0.0.0/8||").is_none());
    }

    #[test]
    fn test_parse_bgp_dump_line_as_set() {
        // AS_SET at the origin: ambiguous origin, skip the line.
        let line = "TABLE_DUMP2|123|B|1.1.1.1|1|10.0.0.0/8|701 {64512,64513}|";
        assert!(parse_bgp_dump_line(line).is_none());

        // AS_SET mid-path: drop the set, keep the surrounding hops.
        let line = "TABLE_DUMP2|123|B|1.1.1.1|1|10.0.0.0/8|701 {64512} 200|";
        let entry = parse_bgp_dump_line(line).unwrap();
        assert_eq!(entry.as_path, vec![701, 200]);
        assert_eq!(entry.record.origin_asn, 200);
    }

    #[test]
    fn test_parse_delegation_ipv6() {
        let line = "ripencc|NL|ipv6|2001:db8::|32|20040101|allocated|abc";
        let blocks = parse_delegation_line(line);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].prefix.to_string(), "2001:db8::/32");
        assert_eq!(blocks[0].rir, Rir::RipeNcc);
        assert_eq!(blocks[0].country, "NL");
        assert_eq!(
            blocks[0].allocated_on,
            NaiveDate::from_ymd_opt(2004, 1, 1)
        );
    }

    #[test]
    fn test_parse_delegation_ipv4_power_of_two() {
        let line = "arin|US|ipv4|8.0.0.0|8388608|19921201|allocated";
        let blocks = parse_delegation_line(line);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].prefix.to_string(), "8.0.0.0/9");
    }

    #[test]
    fn test_parse_delegation_ipv4_decomposed() {
        // 12288 addresses = /19 + /20
        let line = "apnic|AU|ipv4|203.0.0.0|12288|20000101|assigned";
        let blocks = parse_delegation_line(line);
        let prefixes: Vec<String> = blocks.iter().map(|b| b.prefix.to_string()).collect();
        assert_eq!(prefixes, vec!["203.0.0.0/19", "203.0.32.0/20"]);
    }

    #[test]
    fn test_parse_delegation_skips_noise() {
        assert!(parse_delegation_line("").is_empty());
        assert!(parse_delegation_line("# comment").is_empty());
        assert!(parse_delegation_line("2|apnic|20240101|12345|19830101|20240101|+1000").is_empty());
        assert!(parse_delegation_line("apnic|*|ipv4|*|9999|summary").is_empty());
        assert!(parse_delegation_line("apnic|AU|ipv4|203.0.0.0|256|20000101|reserved").is_empty());
        assert!(parse_delegation_line("apnic|AU|asn|64500|1|20000101|allocated").is_empty());
    }

    #[test]
    fn test_decompose_ipv4_range() {
        let blocks = decompose_ipv4_range("10.0.0.0".parse().unwrap(), 256);
        assert_eq!(blocks, vec!["10.0.0.0/24".parse::<Ipv4Net>().unwrap()]);

        // Misaligned start: 10.0.0.128 + 384 = /25 + /24
        let blocks = decompose_ipv4_range("10.0.0.128".parse().unwrap(), 384);
        let strs: Vec<String> = blocks.iter().map(|b| b.to_string()).collect();
        assert_eq!(strs, vec!["10.0.0.128/25", "10.0.1.0/24"]);
    }

    #[test]
    fn test_read_bgp_dump_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "TABLE_DUMP2|1650000000|B|203.0.113.1|64500|10.0.0.0/8|701 100|IGP"
        )
        .unwrap();
        writeln!(file, "garbage line").unwrap();
        writeln!(
            file,
            "TABLE_DUMP2|1650000000|B|203.0.113.1|64500|2001:db8::/32|701 200|IGP"
        )
        .unwrap();
        file.flush().unwrap();

        let entries = read_bgp_dump(file.path().to_str().unwrap()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_read_delegation_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "2|arin|20240101|2|19921201|20240101|+0000").unwrap();
        writeln!(file, "arin|*|ipv4|*|1|summary").unwrap();
        writeln!(file, "arin|US|ipv4|8.0.0.0|8388608|19921201|allocated").unwrap();
        file.flush().unwrap();

        let blocks = read_delegation_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn test_fetch_with_deadline_times_out() {
        let result: Result<(), _> = fetch_with_deadline(Duration::from_millis(20), || {
            thread::sleep(Duration::from_secs(5));
            Ok(())
        });
        assert!(matches!(
            result,
            Err(EngineError::Ingestion {
                stage: IngestStage::Fetching,
                ..
            })
        ));
    }

    #[test]
    fn test_fetch_with_deadline_passes_value() {
        let result = fetch_with_deadline(Duration::from_secs(5), || Ok(42u32));
        assert_eq!(result.unwrap(), 42);
    }
}
