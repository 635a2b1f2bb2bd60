//! Address and range normalization.
//!
//! Every address-bearing write goes through here before it touches the
//! store. Accepted input forms:
//!
//! - a single address: `192.168.1.10`, `2001:db8::1`
//! - a dashed range: `10.0.0.9-10.0.0.1` (bounds are swapped to ascending)
//! - a CIDR block: `10.0.0.7/24` (truncated to the network address)
//!
//! A range whose bounds collapse to one address is stored as that single
//! address, so `1.2.3.4/32`, `1.2.3.4-1.2.3.4` and `1.2.3.4` all normalize to
//! the same triple.

use ipnet::IpNet;
use std::cmp::Ordering;
use std::fmt;
use std::net::IpAddr;
use thiserror::Error;

/// Errors produced while normalizing address input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("invalid 'value': {0}")]
    InvalidValue(String),
    #[error("invalid 'ipFrom': {0}")]
    InvalidFrom(String),
    #[error("invalid 'ipTo': {0}")]
    InvalidTo(String),
    #[error("'ipFrom' ({from}) and 'ipTo' ({to}) should be in same version")]
    MixedFamily { from: String, to: String },
}

/// Effective address family of an item.
///
/// Overlap is only ever evaluated between items of the same family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
    /// Matches every address; carried by items of type `all`.
    All,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Family::V4 => "v4",
            Family::V6 => "v6",
            Family::All => "all",
        }
    }

    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

/// A normalized, ascending address range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpRange {
    /// Canonical display value (single address, `from-to`, or CIDR).
    pub value: String,
    /// Lower bound, canonical text form.
    pub ip_from: String,
    /// Upper bound, canonical text form. Empty for a single address.
    pub ip_to: String,
    from: IpAddr,
    to: IpAddr,
}

impl IpRange {
    fn single(addr: IpAddr) -> Self {
        let text = addr.to_string();
        Self {
            value: text.clone(),
            ip_from: text,
            ip_to: String::new(),
            from: addr,
            to: addr,
        }
    }

    /// Build from two same-family bounds in any order.
    fn span(a: IpAddr, b: IpAddr, value: Option<String>) -> Self {
        let (from, to) = if compare(&a, &b) == Ordering::Greater {
            (b, a)
        } else {
            (a, b)
        };
        if from == to {
            return Self::single(from);
        }
        let ip_from = from.to_string();
        let ip_to = to.to_string();
        Self {
            value: value.unwrap_or_else(|| format!("{}-{}", ip_from, ip_to)),
            ip_from,
            ip_to,
            from,
            to,
        }
    }

    pub fn family(&self) -> Family {
        Family::of(&self.from)
    }

    /// Sort key of the lower bound.
    pub fn from_key(&self) -> Vec<u8> {
        key(&self.from)
    }

    /// Sort key of the upper bound (equal to the lower bound for a single address).
    pub fn to_key(&self) -> Vec<u8> {
        key(&self.to)
    }
}

#[cfg(test)]
impl IpRange {
    fn is_single(&self) -> bool {
        self.ip_to.is_empty()
    }

    fn contains(&self, ip: &IpAddr) -> bool {
        Family::of(ip) == self.family()
            && compare(&self.from, ip) != Ordering::Greater
            && compare(ip, &self.to) != Ordering::Greater
    }

    fn overlaps(&self, other: &IpRange) -> bool {
        self.family() == other.family()
            && compare(&self.from, &other.to) != Ordering::Greater
            && compare(&other.from, &self.to) != Ordering::Greater
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Big-endian byte key for an address.
///
/// Keys of one family have equal length, so byte-wise comparison matches
/// numeric address order.
pub fn key(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

fn compare(a: &IpAddr, b: &IpAddr) -> Ordering {
    key(a).cmp(&key(b))
}

/// Parse a single address, tolerating surrounding whitespace.
pub fn parse_addr(s: &str) -> Option<IpAddr> {
    s.trim().parse().ok()
}

/// Normalize a free-form value: single address, dashed range or CIDR.
pub fn parse_value(input: &str) -> Result<IpRange, RangeError> {
    let input = input.trim();
    let invalid = || RangeError::InvalidValue(input.to_string());

    if input.is_empty() {
        return Err(invalid());
    }

    if input.contains('/') {
        let net: IpNet = input.parse().map_err(|_| invalid())?;
        let net = net.trunc();
        let (from, to) = (net.network(), net.broadcast());
        if from == to {
            return Ok(IpRange::single(from));
        }
        return Ok(IpRange::span(from, to, Some(net.to_string())));
    }

    if let Some((left, right)) = input.split_once('-') {
        let from = parse_addr(left).ok_or_else(invalid)?;
        let to = parse_addr(right).ok_or_else(invalid)?;
        if Family::of(&from) != Family::of(&to) {
            return Err(RangeError::MixedFamily {
                from: left.trim().to_string(),
                to: right.trim().to_string(),
            });
        }
        return Ok(IpRange::span(from, to, None));
    }

    parse_addr(input).map(IpRange::single).ok_or_else(invalid)
}

/// Normalize an explicit `ipFrom`/`ipTo` pair. An empty `ip_to` means a
/// single address.
pub fn parse_bounds(ip_from: &str, ip_to: &str) -> Result<IpRange, RangeError> {
    let from = parse_addr(ip_from).ok_or_else(|| RangeError::InvalidFrom(ip_from.to_string()))?;
    if ip_to.trim().is_empty() {
        return Ok(IpRange::single(from));
    }
    let to = parse_addr(ip_to).ok_or_else(|| RangeError::InvalidTo(ip_to.to_string()))?;
    if Family::of(&from) != Family::of(&to) {
        return Err(RangeError::MixedFamily {
            from: ip_from.to_string(),
            to: ip_to.to_string(),
        });
    }
    Ok(IpRange::span(from, to, None))
}
