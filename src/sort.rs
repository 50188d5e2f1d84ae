//! Orderings registered as SQLite collations
//!
//! `collate_threat` sorts threat labels by severity, `collate_message_type`
//! sorts result message types the same way and `collate_ip` sorts host
//! addresses numerically.

use std::cmp::Ordering;
use std::net::IpAddr;

use crate::hosts::parse_address;
use crate::severity::Label;

fn threat_rank(text: &str) -> u8 {
    // Unknown labels sort after every known one
    Label::from_name(text).map_or(u8::MAX, |label| label.rank())
}

/// Compare two threat labels, most severe first.
///
/// Labels are matched case-insensitively. Text that is not a label sorts
/// after all labels, and among itself by plain byte order.
pub fn compare_threats(a: &str, b: &str) -> Ordering {
    threat_rank(a)
        .cmp(&threat_rank(b))
        .then_with(|| match (Label::from_name(a), Label::from_name(b)) {
            (None, None) => a.cmp(b),
            _ => Ordering::Equal,
        })
}

/// Message types as produced by `severity_to_type`, most severe first.
const MESSAGE_TYPES: [&str; 6] = [
    "Alarm",
    "Log Message",
    "Debug Message",
    "Error Message",
    "False Positive",
    "Internal Error",
];

fn message_type_rank(text: &str) -> Option<usize> {
    MESSAGE_TYPES
        .iter()
        .position(|known| known.eq_ignore_ascii_case(text.trim()))
}

/// Compare two result message types, most severe first.
///
/// Unknown types come last, ordered as text.
pub fn compare_message_types(a: &str, b: &str) -> Ordering {
    match (message_type_rank(a), message_type_rank(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn address_key(addr: IpAddr) -> (u8, u128) {
    match addr {
        IpAddr::V4(v4) => (4, u32::from(v4) as u128),
        IpAddr::V6(v6) => (6, u128::from(v6)),
    }
}

/// Compare two host strings by address value.
///
/// IPv4 sorts before IPv6, and `10.0.0.9` before `10.0.0.10`. Anything
/// that is not an address (host names, ranges) comes after the addresses,
/// ordered as text.
pub fn compare_ips(a: &str, b: &str) -> Ordering {
    match (parse_address(a), parse_address(b)) {
        (Some(x), Some(y)) => address_key(x).cmp(&address_key(y)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}
