//! Address codec
//!
//! Parsing and classification of textual IP addresses, plus the binary
//! key form shared by the index structures. An address is turned into a
//! left-aligned 128-bit key: bit 0 of the key is the most significant bit
//! of the address, so IPv4 keys occupy the top 32 bits and the trie walk
//! is identical for both families.
//!
//! Everything here is pure; the only failure mode is `InvalidAddress`.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// IP address family tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

impl AddressFamily {
    /// Bit width of an address in this family (32 or 128)
    pub fn bits(&self) -> u8 {
        match self {
            AddressFamily::Ipv4 => 32,
            AddressFamily::Ipv6 => 128,
        }
    }

    pub fn of(addr: &IpAddr) -> AddressFamily {
        match addr {
            IpAddr::V4(_) => AddressFamily::Ipv4,
            IpAddr::V6(_) => AddressFamily::Ipv6,
        }
    }

    pub fn of_net(net: &IpNet) -> AddressFamily {
        match net {
            IpNet::V4(_) => AddressFamily::Ipv4,
            IpNet::V6(_) => AddressFamily::Ipv6,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressFamily::Ipv4 => write!(f, "ipv4"),
            AddressFamily::Ipv6 => write!(f, "ipv6"),
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse a textual IP address (dotted-quad or any RFC 4291 colon form,
/// including compressed `::`)
pub fn parse(text: &str) -> Result<IpAddr, EngineError> {
    text.trim()
        .parse::<IpAddr>()
        .map_err(|_| EngineError::invalid_address(text))
}

/// Parse a textual CIDR prefix, normalizing the base to canonical form
/// (host bits zeroed)
pub fn parse_prefix(text: &str) -> Result<IpNet, EngineError> {
    let net = text
        .trim()
        .parse::<IpNet>()
        .map_err(|_| EngineError::invalid_address(text))?;
    Ok(net.trunc())
}

/// Classify a string as IPv4, IPv6, or neither without fully parsing it.
///
/// Callers use this to branch before handing input to the engine; `None`
/// means the input is not an IP address at all.
pub fn detect_family(text: &str) -> Option<AddressFamily> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    // A colon can only appear in IPv6 forms, a dot without any colon only
    // in IPv4 forms. Full validation still goes through the parser.
    if text.contains(':') {
        text.parse::<std::net::Ipv6Addr>()
            .ok()
            .map(|_| AddressFamily::Ipv6)
    } else if text.contains('.') {
        text.parse::<std::net::Ipv4Addr>()
            .ok()
            .map(|_| AddressFamily::Ipv4)
    } else {
        None
    }
}

// =============================================================================
// Binary keys
// =============================================================================

/// Left-aligned 128-bit key plus the family bit width.
///
/// Bit `i` (0-based, from the most significant end) of the address is
/// `(key >> (127 - i)) & 1` for both families.
pub fn addr_bits(addr: &IpAddr) -> (u128, u8) {
    match addr {
        IpAddr::V4(v4) => ((u32::from(*v4) as u128) << 96, 32),
        IpAddr::V6(v6) => (u128::from(*v6), 128),
    }
}

/// Left-aligned key of a prefix base together with the prefix length
pub fn prefix_bits(net: &IpNet) -> (u128, u8) {
    let (key, _) = addr_bits(&net.addr());
    (key, net.prefix_len())
}

/// Zero all bits of a left-aligned key beyond `len`
pub fn mask_prefix(key: u128, len: u8) -> u128 {
    if len == 0 {
        0
    } else if len >= 128 {
        key
    } else {
        key & (u128::MAX << (128 - len))
    }
}

/// Bit `i` of a left-aligned key, counted from the most significant end
#[inline]
pub fn key_bit(key: u128, i: u8) -> bool {
    (key >> (127 - i)) & 1 == 1
}
