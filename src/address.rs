//! Provides functions to expand address ranges and port lists, and to resolve
//! the host given to a port scan.
//!
//! Address ranges are dotted quads where any octet may be an inclusive range,
//! e.g. `192.168.0-1.1-254`. Port lists are comma separated literals and
//! inclusive ranges, e.g. `80,443,8000-8010`.
use std::net::{IpAddr, Ipv4Addr};
use std::ops::RangeInclusive;

use hickory_resolver::{
    config::{ResolverConfig, ResolverOpts},
    TokioAsyncResolver,
};
use itertools::iproduct;
use log::debug;

use crate::error::ScanError;

const LOWEST_PORT_NUMBER: u16 = 1;
const TOP_PORT_NUMBER: u16 = 65535;

/// Upper bound on the number of addresses a single range may expand to.
/// Large enough for a full /16.
pub const MAX_EXPANDED_ADDRESSES: usize = 65_536;

/// Expands an address range into every address it covers.
///
/// The first octet varies slowest, the last octet fastest.
///
/// ```rust
/// # use netsweep::address::expand_address_range;
/// let ips = expand_address_range("192.168.1.0-2").unwrap();
/// assert_eq!(ips.len(), 3);
/// assert_eq!(ips[2].to_string(), "192.168.1.2");
/// ```
pub fn expand_address_range(range: &str) -> Result<Vec<Ipv4Addr>, ScanError> {
    expand_address_range_with_limit(range, MAX_EXPANDED_ADDRESSES)
}

/// Same as [`expand_address_range`] with a caller-chosen expansion limit.
pub fn expand_address_range_with_limit(
    range: &str,
    limit: usize,
) -> Result<Vec<Ipv4Addr>, ScanError> {
    let segments: Vec<&str> = range.trim().split('.').collect();
    if segments.len() != 4 {
        return Err(ScanError::malformed(
            range,
            format!("expected 4 octets, found {}", segments.len()),
        ));
    }

    let octets = segments
        .iter()
        .map(|segment| parse_octet_range(range, segment))
        .collect::<Result<Vec<_>, _>>()?;

    let size: u64 = octets
        .iter()
        .map(|o| u64::from(*o.end() - *o.start()) + 1)
        .product();
    if size > limit as u64 {
        return Err(ScanError::RangeTooLarge {
            input: range.to_owned(),
            size,
            limit,
        });
    }

    let ips = iproduct!(
        octets[0].clone(),
        octets[1].clone(),
        octets[2].clone(),
        octets[3].clone()
    )
    .map(|(a, b, c, d)| Ipv4Addr::new(a, b, c, d))
    .collect::<Vec<_>>();

    debug!("Expanded {range} into {} addresses", ips.len());
    Ok(ips)
}

fn parse_octet_range(range: &str, segment: &str) -> Result<RangeInclusive<u8>, ScanError> {
    let segment = segment.trim();
    match segment.split_once('-') {
        Some((lo, hi)) => {
            let lo = parse_octet(range, lo)?;
            let hi = parse_octet(range, hi)?;
            if lo > hi {
                return Err(ScanError::malformed(
                    range,
                    format!("octet range '{segment}' starts above its end"),
                ));
            }
            Ok(lo..=hi)
        }
        None => {
            let value = parse_octet(range, segment)?;
            Ok(value..=value)
        }
    }
}

fn parse_octet(range: &str, octet: &str) -> Result<u8, ScanError> {
    let octet = octet.trim();
    if octet.is_empty() || !octet.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ScanError::malformed(
            range,
            format!("octet '{octet}' is not a number"),
        ));
    }
    octet
        .parse::<u8>()
        .map_err(|_| ScanError::malformed(range, format!("octet '{octet}' is above 255")))
}

/// Expands a port list into individual ports.
///
/// Components keep their left-to-right order, ranges are ascending and
/// duplicates are kept.
///
/// ```rust
/// # use netsweep::address::expand_port_range;
/// assert_eq!(
///     expand_port_range("80,443,8000-8002").unwrap(),
///     vec![80, 443, 8000, 8001, 8002]
/// );
/// ```
pub fn expand_port_range(list: &str) -> Result<Vec<u16>, ScanError> {
    let mut ports = Vec::new();

    for part in list.split(',') {
        let part = part.trim();
        match part.split_once('-') {
            Some((start, end)) => {
                let start = parse_single_port(list, start)?;
                let end = parse_single_port(list, end)?;
                if start > end {
                    return Err(ScanError::malformed(
                        list,
                        format!("start port {start} is greater than end port {end} in '{part}'"),
                    ));
                }
                ports.extend(start..=end);
            }
            None => ports.push(parse_single_port(list, part)?),
        }
    }

    Ok(ports)
}

fn parse_single_port(list: &str, port_str: &str) -> Result<u16, ScanError> {
    let port_str = port_str.trim();
    if port_str.is_empty() || !port_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ScanError::malformed(
            list,
            format!("invalid port number '{port_str}'"),
        ));
    }
    let port: u16 = port_str
        .parse()
        .map_err(|_| ScanError::malformed(list, format!("invalid port number '{port_str}'")))?;

    if port < LOWEST_PORT_NUMBER {
        return Err(ScanError::malformed(
            list,
            format!("port {port} must be between {LOWEST_PORT_NUMBER} and {TOP_PORT_NUMBER}"),
        ));
    }

    Ok(port)
}

/// True for addresses in 10.0.0.0/8, 172.16.0.0/12 and 192.168.0.0/16.
pub fn is_private_address(addr: Ipv4Addr) -> bool {
    let [a, b, ..] = addr.octets();
    a == 10 || (a == 172 && (16..=31).contains(&b)) || (a == 192 && b == 168)
}

/// Splits a dotted quad into its four octets.
pub fn ip_to_octets(ip: &str) -> Result<[u8; 4], ScanError> {
    ip.trim()
        .parse::<Ipv4Addr>()
        .map(|addr| addr.octets())
        .map_err(|_| ScanError::malformed(ip, "not an IPv4 address"))
}

/// The range covering every address that shares the first three octets with
/// `addr`, e.g. `192.168.2.108` becomes `192.168.2.0-255`.
pub fn subnet_sweep_range(addr: Ipv4Addr) -> String {
    let [a, b, c, _] = addr.octets();
    format!("{a}.{b}.{c}.0-255")
}

/// Resolves the host of a port scan to a single IPv4 address.
///
/// Literal addresses are used as-is. Names go through the system resolver
/// first and fall back to a resolver built from the system configuration (or
/// CloudFlare when there is none).
pub async fn resolve_host(host: &str) -> Result<Ipv4Addr, ScanError> {
    let host = host.trim();
    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(ip);
    }

    if let Ok(addrs) = tokio::net::lookup_host((host, 80)).await {
        if let Some(ip) = addrs.map(|a| a.ip()).find_map(ipv4) {
            return Ok(ip);
        }
    }

    let backup_resolver = get_resolver();
    if let Ok(lookup) = backup_resolver.lookup_ip(host).await {
        if let Some(ip) = lookup.iter().find_map(ipv4) {
            return Ok(ip);
        }
    }

    Err(ScanError::UnresolvableHost(host.to_owned()))
}

fn ipv4(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(_) => None,
    }
}

fn get_resolver() -> TokioAsyncResolver {
    TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| {
        TokioAsyncResolver::tokio(ResolverConfig::cloudflare_tls(), ResolverOpts::default())
    })
}
