//! Address discovery: finds the addresses this machine is reachable on and
//! reports them as candidate lines, which [`extract_connection_info`] parses.
//!
//! The default provider asks a STUN server for the server reflexive address
//! of a UDP socket. The socket's own bound address becomes the host candidate.
//!
//! [`extract_connection_info`]: crate::candidate::extract_connection_info
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use rand::RngCore;
use tokio::net::{lookup_host, UdpSocket};
use tokio::time::{self, Instant};

const MAGIC_COOKIE: u32 = 0x2112_A442;
/// High half of the cookie, the XOR key for ports.
const COOKIE_HIGH: u16 = 0x2112;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;
const FAMILY_IPV4: u8 = 0x01;
const HEADER_LEN: usize = 20;

/// Source of candidate lines.
#[async_trait]
pub trait AddressDiscovery: Send + Sync {
    /// Gathers candidates until the provider is done. Failures yield fewer
    /// (possibly zero) lines, never an error.
    async fn gather_candidates(&self) -> Vec<String>;
}

/// Discovers addresses through a STUN binding request.
#[derive(Debug, Clone)]
pub struct StunDiscovery {
    server: String,
    timeout: Duration,
}

impl StunDiscovery {
    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            timeout,
        }
    }

    async fn gather(&self, candidates: &mut Vec<String>) -> std::io::Result<()> {
        let server = lookup_host(self.server.as_str())
            .await?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| std::io::Error::other(format!("{} has no IPv4 address", self.server)))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;
        let SocketAddr::V4(local) = socket.local_addr()? else {
            return Ok(());
        };
        candidates.push(host_candidate(local));

        let mut transaction = [0u8; 12];
        rand::rng().fill_bytes(&mut transaction);
        socket.send(&binding_request(&transaction)).await?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; 576];
        loop {
            let n = match time::timeout_at(deadline, socket.recv(&mut buf)).await {
                Ok(received) => received?,
                Err(_) => {
                    debug!("No STUN answer from {server} within {:?}", self.timeout);
                    return Ok(());
                }
            };
            if let Some(public) = parse_binding_response(&buf[..n], &transaction) {
                candidates.push(srflx_candidate(public, local));
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl AddressDiscovery for StunDiscovery {
    async fn gather_candidates(&self) -> Vec<String> {
        let mut candidates = Vec::new();
        if let Err(e) = self.gather(&mut candidates).await {
            warn!("Address discovery through {} failed: {e}", self.server);
        }
        candidates
    }
}

fn host_candidate(local: SocketAddrV4) -> String {
    format!(
        "candidate:0 1 UDP 2122252543 {} {} typ host",
        local.ip(),
        local.port()
    )
}

fn srflx_candidate(public: SocketAddrV4, local: SocketAddrV4) -> String {
    format!(
        "candidate:1 1 UDP 1686052607 {} {} typ srflx raddr {} rport {}",
        public.ip(),
        public.port(),
        local.ip(),
        local.port()
    )
}

/// Encodes a STUN binding request without attributes.
pub fn binding_request(transaction: &[u8; 12]) -> [u8; HEADER_LEN] {
    let mut msg = [0u8; HEADER_LEN];
    msg[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    // message length stays 0
    msg[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    msg[8..20].copy_from_slice(transaction);
    msg
}

/// Extracts the mapped IPv4 address from a binding success response for
/// `transaction`. XOR-MAPPED-ADDRESS is preferred over MAPPED-ADDRESS.
pub fn parse_binding_response(msg: &[u8], transaction: &[u8; 12]) -> Option<SocketAddrV4> {
    if msg.len() < HEADER_LEN
        || u16::from_be_bytes([msg[0], msg[1]]) != BINDING_SUCCESS
        || u32::from_be_bytes([msg[4], msg[5], msg[6], msg[7]]) != MAGIC_COOKIE
        || &msg[8..20] != transaction
    {
        return None;
    }

    let length = usize::from(u16::from_be_bytes([msg[2], msg[3]]));
    let body = msg.get(HEADER_LEN..HEADER_LEN + length)?;

    let mut mapped = None;
    let mut offset = 0;
    while offset + 4 <= body.len() {
        let kind = u16::from_be_bytes([body[offset], body[offset + 1]]);
        let len = usize::from(u16::from_be_bytes([body[offset + 2], body[offset + 3]]));
        let value = body.get(offset + 4..offset + 4 + len)?;

        match kind {
            ATTR_XOR_MAPPED_ADDRESS => return decode_address(value, true),
            ATTR_MAPPED_ADDRESS => mapped = decode_address(value, false),
            _ => {}
        }
        // attributes are padded to 4 bytes
        offset += 4 + len.div_ceil(4) * 4;
    }
    mapped
}

fn decode_address(value: &[u8], xored: bool) -> Option<SocketAddrV4> {
    if value.len() < 8 || value[1] != FAMILY_IPV4 {
        return None;
    }
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    let mut ip = u32::from_be_bytes([value[4], value[5], value[6], value[7]]);
    if xored {
        port ^= COOKIE_HIGH;
        ip ^= MAGIC_COOKIE;
    }
    Some(SocketAddrV4::new(ip.into(), port))
}
