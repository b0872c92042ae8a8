//! Allowed-subnet validation.
//!
//! Validation is stricter than `Ipv4Net::from_str`: exactly four
//! decimal octets and an explicit prefix, nothing else. `10.0.0.0` without a
//! prefix is rejected rather than read as a host route.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;
use tracing::warn;

/// One entry of the operator's allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedSubnet {
    /// The entry as written, trimmed.
    pub raw: String,
    /// Parsed network, host bits cleared. `None` when invalid.
    pub cidr: Option<Ipv4Net>,
}

impl AllowedSubnet {
    /// Whether the entry passed validation.
    pub fn is_valid(&self) -> bool {
        self.cidr.is_some()
    }
}

/// Accept iff `s` is `A.B.C.D/P` with each octet in 0..=255 and P in 0..=32.
pub fn validate_cidr(s: &str) -> bool {
    parse_cidr(s).is_some()
}

/// Strict `A.B.C.D/P` parse. Leading zeros are tolerated in octets, unlike
/// `Ipv4Addr::from_str`.
fn parse_cidr(s: &str) -> Option<Ipv4Net> {
    let (addr, prefix) = s.split_once('/')?;

    let parts: Vec<&str> = addr.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut octets = [0u8; 4];
    for (slot, part) in octets.iter_mut().zip(&parts) {
        *slot = decimal_in_range(part, 3, 255)? as u8;
    }

    let prefix = decimal_in_range(prefix, 2, 32)? as u8;
    Ipv4Net::new(Ipv4Addr::from(octets), prefix).ok()
}

fn decimal_in_range(s: &str, max_digits: usize, max: u32) -> Option<u32> {
    if s.is_empty() || s.len() > max_digits || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<u32>().ok().filter(|v| *v <= max)
}

/// Parse one entry.
pub fn parse_subnet(raw: &str) -> AllowedSubnet {
    let raw = raw.trim();
    AllowedSubnet {
        raw: raw.to_string(),
        cidr: parse_cidr(raw).map(|net| net.trunc()),
    }
}

/// Parse a comma-separated allow-list. Empty entries are ignored; invalid
/// ones are kept (so they can be reported) and logged.
pub fn parse_allowed_subnets(csv: &str) -> Vec<AllowedSubnet> {
    csv.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let subnet = parse_subnet(entry);
            if !subnet.is_valid() {
                warn!("Ignoring invalid allowed subnet '{}'", entry);
            }
            subnet
        })
        .collect()
}
