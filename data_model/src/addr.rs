//! Address parsing helpers shared by the resource kinds.
//!
//! Every helper returns the canonical textual form: IPv6 in compressed
//! notation, prefixes with host bits cleared, MAC addresses lower-cased.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub fn parse_ip(value: &str) -> Result<IpAddr, String> {
    value
        .trim()
        .parse::<IpAddr>()
        .map_err(|_| format!("{value:?} is not an IP address"))
}

pub fn canonical_ip(value: &str) -> Result<String, String> {
    parse_ip(value).map(|ip| ip.to_string())
}

fn split_prefix(value: &str) -> Result<(IpAddr, u8), String> {
    let (addr, len) = value
        .trim()
        .split_once('/')
        .ok_or_else(|| format!("{value:?} is missing a prefix length"))?;
    let ip = parse_ip(addr)?;
    let len: u8 = len
        .parse()
        .map_err(|_| format!("{value:?} has an invalid prefix length"))?;
    let max = if ip.is_ipv4() { 32 } else { 128 };
    if len > max {
        return Err(format!("{value:?} prefix length exceeds {max}"));
    }
    Ok((ip, len))
}

fn mask(ip: IpAddr, len: u8) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => {
            let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
            IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
        }
        IpAddr::V6(v6) => {
            let mask = if len == 0 { 0 } else { u128::MAX << (128 - len) };
            IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
        }
    }
}

/// Network prefix with the host bits cleared, e.g. `10.0.0.5/24` becomes
/// `10.0.0.0/24`.
pub fn canonical_prefix(value: &str) -> Result<String, String> {
    let (ip, len) = split_prefix(value)?;
    Ok(format!("{}/{len}", mask(ip, len)))
}

/// Family of a prefix or a plain address.
pub fn is_ipv4(value: &str) -> Result<bool, String> {
    match value.split_once('/') {
        Some(_) => split_prefix(value).map(|(ip, _)| ip.is_ipv4()),
        None => parse_ip(value).map(|ip| ip.is_ipv4()),
    }
}

/// Interface address keeps its host part: `10.0.0.5/24` stays as is, only
/// the textual form is canonicalized.
pub fn canonical_interface_address(value: &str) -> Result<String, String> {
    let (ip, len) = split_prefix(value)?;
    Ok(format!("{ip}/{len}"))
}

pub fn canonical_mac(value: &str) -> Result<String, String> {
    let lowered = value.trim().to_ascii_lowercase();
    let octets: Vec<&str> = lowered.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()));
    if !valid {
        return Err(format!("{value:?} is not a MAC address"));
    }
    Ok(lowered)
}

pub fn unspecified(ipv4: bool) -> IpAddr {
    if ipv4 {
        IpAddr::V4(Ipv4Addr::UNSPECIFIED)
    } else {
        IpAddr::V6(Ipv6Addr::UNSPECIFIED)
    }
}

/// Rewrites `value` in place when it parses, leaving malformed input for
/// key derivation to reject.
pub(crate) fn normalize_with(value: &mut String, f: fn(&str) -> Result<String, String>) {
    if value.is_empty() {
        return;
    }
    if let Ok(canonical) = f(value) {
        *value = canonical;
    }
}
