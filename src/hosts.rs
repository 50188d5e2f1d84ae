use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use log::warn;

use crate::error::VmSqlError;

const HOST_DELIMITER: &str = ", ";

/// A comma separated host specification, trimmed, without empty or repeated
/// tokens. Tokens keep the order in which they were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostList {
    tokens: Vec<String>,
}

impl HostList {
    /// Split on commas, trim each token, drop empty tokens and repeats.
    pub fn normalize(raw: &str) -> Self {
        let mut seen = HashSet::new();
        let tokens = raw
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .filter(|token| seen.insert(*token))
            .map(str::to_owned)
            .collect();

        HostList { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn contains(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        self.tokens.iter().any(|token| token == candidate)
    }
}

impl fmt::Display for HostList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tokens.join(HOST_DELIMITER))
    }
}

/// Whether the raw host list `hosts` names `candidate`. Both sides are
/// trimmed; the comparison is exact.
pub fn contains(hosts: &str, candidate: &str) -> bool {
    let candidate = candidate.trim();
    hosts.split(',').any(|token| token.trim() == candidate)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
}

/// One expanded host token: an inclusive range of numeric addresses, or a
/// host name that stands for a single host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTarget {
    Range {
        family: AddressFamily,
        first: u128,
        last: u128,
    },
    Name(String),
}

/// Turns host specification tokens into concrete targets.
pub trait HostExpander {
    fn expand_token(&self, token: &str) -> Result<HostTarget, VmSqlError>;

    fn expand(&self, hosts: &HostList) -> Result<Vec<HostTarget>, VmSqlError> {
        hosts
            .tokens()
            .iter()
            .map(|token| self.expand_token(token))
            .collect()
    }
}

/// Expands single addresses, CIDR blocks, address ranges and host names.
///
/// Accepted forms:
/// - `192.168.0.1`, `2001:db8::1`
/// - `192.168.0.0/24`, `2001:db8::/120` (network and broadcast addresses
///   are left out when the block has more than two addresses)
/// - `192.168.0.1-192.168.0.20`, `2001:db8::1-2001:db8::ff`
/// - `192.168.0.1-20` (range over the last octet)
/// - host names, compared case-insensitively
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeExpander;

impl RangeExpander {
    fn invalid(token: &str, reason: &str) -> VmSqlError {
        VmSqlError::InvalidArgument(format!("Invalid host '{}': {}", token, reason))
    }

    fn to_number(addr: IpAddr) -> (AddressFamily, u128) {
        match addr {
            IpAddr::V4(v4) => (AddressFamily::V4, u128::from(u32::from(v4))),
            IpAddr::V6(v6) => (AddressFamily::V6, u128::from(v6)),
        }
    }

    fn expand_cidr(token: &str, addr: &str, prefix: &str) -> Result<HostTarget, VmSqlError> {
        let addr: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| Self::invalid(token, "bad network address"))?;
        let prefix: u32 = prefix
            .trim()
            .parse()
            .map_err(|_| Self::invalid(token, "bad prefix length"))?;

        let (family, value) = Self::to_number(addr);
        let bits = match family {
            AddressFamily::V4 => 32,
            AddressFamily::V6 => 128,
        };
        if prefix > bits {
            return Err(Self::invalid(token, "prefix length out of range"));
        }

        let host_bits = bits - prefix;
        let host_mask = if host_bits == 128 {
            u128::MAX
        } else {
            (1u128 << host_bits) - 1
        };
        let network = value & !host_mask;
        let broadcast = network | host_mask;

        let (first, last) = if host_bits >= 2 {
            (network + 1, broadcast - 1)
        } else {
            (network, broadcast)
        };

        Ok(HostTarget::Range {
            family,
            first,
            last,
        })
    }

    fn expand_range(token: &str, start: IpAddr, end: &str) -> Result<HostTarget, VmSqlError> {
        let end = end.trim();
        let (family, first) = Self::to_number(start);

        let last = match (start, end.parse::<IpAddr>()) {
            (IpAddr::V4(_), Ok(IpAddr::V4(v4))) => u128::from(u32::from(v4)),
            (IpAddr::V6(_), Ok(IpAddr::V6(v6))) => u128::from(v6),
            (_, Ok(_)) => return Err(Self::invalid(token, "mixed address families")),
            (IpAddr::V4(v4), Err(_)) => {
                let last_octet: u8 = end
                    .parse()
                    .map_err(|_| Self::invalid(token, "bad range end"))?;
                let [a, b, c, _] = v4.octets();
                u128::from(u32::from(Ipv4Addr::new(a, b, c, last_octet)))
            }
            (IpAddr::V6(_), Err(_)) => return Err(Self::invalid(token, "bad range end")),
        };

        if last < first {
            return Err(Self::invalid(token, "range end precedes start"));
        }

        Ok(HostTarget::Range {
            family,
            first,
            last,
        })
    }

    fn is_host_name(token: &str) -> bool {
        token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    }
}

impl HostExpander for RangeExpander {
    fn expand_token(&self, token: &str) -> Result<HostTarget, VmSqlError> {
        if let Ok(addr) = token.parse::<IpAddr>() {
            let (family, value) = Self::to_number(addr);
            return Ok(HostTarget::Range {
                family,
                first: value,
                last: value,
            });
        }

        if let Some((addr, prefix)) = token.split_once('/') {
            return Self::expand_cidr(token, addr, prefix);
        }

        if let Some((start, end)) = token.split_once('-') {
            if let Ok(start) = start.trim().parse::<IpAddr>() {
                return Self::expand_range(token, start, end);
            }
        }

        if Self::is_host_name(token) {
            return Ok(HostTarget::Name(token.to_ascii_lowercase()));
        }

        Err(Self::invalid(token, "not an address, range or host name"))
    }
}

/// Sort and merge inclusive ranges so none overlap or touch.
fn merge_ranges(mut ranges: Vec<(u128, u128)>) -> Vec<(u128, u128)> {
    ranges.sort_unstable();
    let mut merged: Vec<(u128, u128)> = Vec::with_capacity(ranges.len());
    for (first, last) in ranges {
        match merged.last_mut() {
            Some((_, prev_last)) if first <= prev_last.saturating_add(1) => {
                *prev_last = (*prev_last).max(last);
            }
            _ => merged.push((first, last)),
        }
    }
    merged
}

fn range_size(first: u128, last: u128) -> u128 {
    (last - first).saturating_add(1)
}

/// Number of addresses covered by both merged range lists.
fn overlap(a: &[(u128, u128)], b: &[(u128, u128)]) -> u128 {
    let (mut i, mut j) = (0, 0);
    let mut total = 0u128;
    while i < a.len() && j < b.len() {
        let first = a[i].0.max(b[j].0);
        let last = a[i].1.min(b[j].1);
        if first <= last {
            total = total.saturating_add(range_size(first, last));
        }
        if a[i].1 < b[j].1 {
            i += 1;
        } else {
            j += 1;
        }
    }
    total
}

/// Distinct addresses and names a set of targets stands for.
#[derive(Default)]
struct HostSet {
    v4: Vec<(u128, u128)>,
    v6: Vec<(u128, u128)>,
    names: HashSet<String>,
}

impl HostSet {
    fn from_targets(targets: Vec<HostTarget>) -> Self {
        let mut set = HostSet::default();
        for target in targets {
            match target {
                HostTarget::Range {
                    family: AddressFamily::V4,
                    first,
                    last,
                } => set.v4.push((first, last)),
                HostTarget::Range {
                    family: AddressFamily::V6,
                    first,
                    last,
                } => set.v6.push((first, last)),
                HostTarget::Name(name) => {
                    set.names.insert(name);
                }
            }
        }
        set.v4 = merge_ranges(set.v4);
        set.v6 = merge_ranges(set.v6);
        set
    }

    fn size(&self) -> u128 {
        self.v4
            .iter()
            .chain(self.v6.iter())
            .fold(self.names.len() as u128, |acc, &(first, last)| {
                acc.saturating_add(range_size(first, last))
            })
    }

    fn overlap(&self, other: &HostSet) -> u128 {
        let names = self.names.intersection(&other.names).count() as u128;
        names
            .saturating_add(overlap(&self.v4, &other.v4))
            .saturating_add(overlap(&self.v6, &other.v6))
    }
}

/// Count the distinct hosts `hosts` expands to, leaving out any that
/// `excluded` also covers. Exclusion works on addresses, so excluding a
/// single address from a block removes just that address.
///
/// Missing or empty `hosts` counts as 0.
pub fn count_with(
    hosts: Option<&str>,
    excluded: Option<&str>,
    expander: &dyn HostExpander,
) -> Result<i64, VmSqlError> {
    let hosts = match hosts.map(HostList::normalize) {
        Some(list) if !list.is_empty() => list,
        _ => return Ok(0),
    };

    let included = HostSet::from_targets(expander.expand(&hosts)?);

    let total = match excluded.map(HostList::normalize) {
        Some(list) if !list.is_empty() => {
            let excluded = HostSet::from_targets(expander.expand(&list)?);
            included.size() - included.overlap(&excluded)
        }
        _ => included.size(),
    };

    Ok(i64::try_from(total).unwrap_or(i64::MAX))
}

/// `count_with` using the built-in `RangeExpander`.
pub fn count(hosts: Option<&str>, excluded: Option<&str>) -> Result<i64, VmSqlError> {
    count_with(hosts, excluded, &RangeExpander)
}

/// Count for use inside a query: malformed host lists count as 0.
pub fn count_or_zero(hosts: Option<&str>, excluded: Option<&str>) -> i64 {
    count(hosts, excluded).unwrap_or_else(|e| {
        warn!("Counting hosts failed: {}", e);
        0
    })
}

/// Parse a single address, for callers that need to order hosts.
pub fn parse_address(text: &str) -> Option<IpAddr> {
    text.trim().parse().ok()
}
