//! Parsing of ICE candidate lines.
//!
//! A candidate line looks like
//! `candidate:0 1 UDP 2122252543 192.168.2.108 52229 typ host` for a local
//! address, or carries a `raddr <ip> rport <port>` suffix for server
//! reflexive and relayed candidates. Only IPv4 candidates are understood.
use std::fmt;
use std::net::Ipv4Addr;
use std::ops::Range;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_derive::Serialize;

static HOST_CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((?:\d{1,3}\.){3}\d{1,3}) (\d{1,5}) typ host").expect("valid regex")
});

static SRFLX_CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"((?:\d{1,3}\.){3}\d{1,3}) (\d{1,5}) typ srflx raddr ((?:\d{1,3}\.){3}\d{1,3}) rport (\d{1,5})",
    )
    .expect("valid regex")
});

static RELAY_CANDIDATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"((?:\d{1,3}\.){3}\d{1,3}) (\d{1,5}) typ relay raddr ((?:\d{1,3}\.){3}\d{1,3}) rport (\d{1,5})",
    )
    .expect("valid regex")
});

static RELATED_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"((?:\d{1,3}\.){3}\d{1,3}) rport (\d{1,5})").expect("valid regex")
});

/// Kind of endpoint a candidate describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateType {
    Host,
    Srflx,
    Relay,
}

impl fmt::Display for CandidateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Host => "host",
            Self::Srflx => "srflx",
            Self::Relay => "relay",
        })
    }
}

/// Addresses extracted from one candidate line.
///
/// `ip`/`port` always hold the locally bound endpoint. For reflexive and
/// relayed candidates the externally visible endpoint goes to
/// `public_ip`/`public_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    #[serde(rename = "type")]
    pub kind: CandidateType,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub public_ip: Option<Ipv4Addr>,
    pub public_port: Option<u16>,
}

/// Extracts connection info from a candidate line, `None` if the line is not a
/// host, srflx or relay candidate.
pub fn extract_connection_info(candidate: &str) -> Option<ConnectionInfo> {
    if let Some(caps) = HOST_CANDIDATE.captures(candidate) {
        return Some(ConnectionInfo {
            kind: CandidateType::Host,
            ip: parse_group(&caps, 1)?,
            port: parse_group(&caps, 2)?,
            public_ip: None,
            public_port: None,
        });
    }

    for (regex, kind) in [
        (&*SRFLX_CANDIDATE, CandidateType::Srflx),
        (&*RELAY_CANDIDATE, CandidateType::Relay),
    ] {
        if let Some(caps) = regex.captures(candidate) {
            return Some(ConnectionInfo {
                kind,
                ip: parse_group(&caps, 3)?,
                port: parse_group(&caps, 4)?,
                public_ip: Some(parse_group(&caps, 1)?),
                public_port: Some(parse_group(&caps, 2)?),
            });
        }
    }

    None
}

fn parse_group<T: std::str::FromStr>(caps: &Captures<'_>, group: usize) -> Option<T> {
    caps.get(group)?.as_str().parse().ok()
}

/// Rewrites the local endpoint of a candidate line.
///
/// On a host candidate the address and port are replaced, on a reflexive or
/// relayed candidate the `raddr`/`rport` pair is. Lines matching neither are
/// returned unchanged.
pub fn replace_connection_info(candidate: &str, ip: Ipv4Addr, port: u16) -> String {
    let Some(caps) = HOST_CANDIDATE
        .captures(candidate)
        .or_else(|| RELATED_ADDRESS.captures(candidate))
    else {
        return candidate.to_owned();
    };
    let (Some(ip_span), Some(port_span)) = (caps.get(1), caps.get(2)) else {
        return candidate.to_owned();
    };

    splice(
        candidate,
        ip_span.range(),
        &ip.to_string(),
        port_span.range(),
        &port.to_string(),
    )
}

fn splice(text: &str, first: Range<usize>, a: &str, second: Range<usize>, b: &str) -> String {
    let mut out = String::with_capacity(text.len() + a.len() + b.len());
    out.push_str(&text[..first.start]);
    out.push_str(a);
    out.push_str(&text[first.end..second.start]);
    out.push_str(b);
    out.push_str(&text[second.end..]);
    out
}
