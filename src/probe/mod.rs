//! Probe channels: one connection attempt against one target, reported as a
//! normalised `(elapsed, signal)` outcome.
//!
//! Each channel wraps a different connection primitive. None of them tells
//! directly whether a host is up or a port is open, the classifier infers it
//! from the signal and how long the attempt took.
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use async_trait::async_trait;
use log::warn;
use serde_derive::{Deserialize, Serialize};

use crate::error::{ProbeError, ScanError};
use crate::timing::TimingStore;

pub mod fetch;
pub mod guard;
pub mod head;
pub mod resource;
pub mod socket;

pub use fetch::OpaqueFetchChannel;
pub use guard::{PendingOutcome, ProbeGuard};
pub use head::HeadRequestChannel;
pub use resource::ResourceLoadChannel;
pub use socket::SocketHandshakeChannel;

/// URL scheme a target is probed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Ws,
    Ftp,
}

impl Scheme {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Ws => "ws",
            Self::Ftp => "ftp",
        }
    }

    /// Port used when a target does not name one.
    pub fn default_port(self) -> u16 {
        match self {
            Self::Http | Self::Ws => 80,
            Self::Ftp => 21,
        }
    }
}

/// One address/port/scheme triple to attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProbeTarget {
    scheme: Scheme,
    ip: Ipv4Addr,
    port: Option<u16>,
}

impl ProbeTarget {
    pub fn new(scheme: Scheme, ip: Ipv4Addr, port: Option<u16>) -> Self {
        Self { scheme, ip, port }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The socket address actually dialled.
    pub fn socket_addr(&self) -> SocketAddr {
        let port = self.port.unwrap_or_else(|| self.scheme.default_port());
        SocketAddr::V4(SocketAddrV4::new(self.ip, port))
    }

    /// Value for a `Host` header.
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.ip),
            None => self.ip.to_string(),
        }
    }

    /// `scheme://ip[:port]`, the address reported in scan results.
    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme.as_str(), self.authority())
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Terminal event a channel observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Connected,
    Disconnected,
    DataReceived,
    TimedOut,
    Error,
    Blocked,
}

impl Signal {
    /// True when the signal alone proves something answered.
    pub fn is_evidence_of_life(self) -> bool {
        matches!(self, Self::Connected | Self::DataReceived)
    }

    pub fn message(self) -> &'static str {
        match self {
            Self::Connected => "CONNECTION OPENED",
            Self::Disconnected => "CONNECTION CLOSED",
            Self::DataReceived => "DATA RECEIVED",
            Self::TimedOut => "NETWORK TIMEOUT",
            Self::Error => "NETWORK ERROR",
            Self::Blocked => "BLOCKED",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl ProbeError {
    pub fn signal(&self) -> Signal {
        match self {
            Self::Transport(_) => Signal::Error,
            Self::Timeout => Signal::TimedOut,
        }
    }
}

/// What a single probe produced. Exactly one per target.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub target: ProbeTarget,
    pub elapsed: Duration,
    pub signal: Signal,
    /// Extra diagnostic, e.g. the transport error text.
    pub detail: Option<String>,
}

impl ProbeOutcome {
    pub fn new(target: ProbeTarget, elapsed: Duration, signal: Signal) -> Self {
        Self {
            target,
            elapsed,
            signal,
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub(crate) fn from_error(target: ProbeTarget, elapsed: Duration, err: &ProbeError) -> Self {
        let outcome = Self::new(target, elapsed, err.signal());
        match err {
            ProbeError::Transport(reason) => outcome.with_detail(reason.clone()),
            ProbeError::Timeout => outcome,
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0
    }
}

/// Selects one of the four probe channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Lightweight `HEAD` request.
    Head,
    /// WebSocket opening handshake.
    Socket,
    /// Cache-bypassing `GET` whose response is never inspected.
    #[default]
    Fetch,
    /// Raw resource load, the only channel that can reach `ftp://`.
    Resource,
}

impl ChannelKind {
    /// Scheme used when sweeping hosts with this channel.
    pub fn host_scheme(self) -> Scheme {
        match self {
            Self::Socket => Scheme::Ws,
            Self::Head | Self::Fetch | Self::Resource => Scheme::Http,
        }
    }
}

/// A connection primitive normalised to a single awaitable outcome.
///
/// Implementations must always complete within roughly `timeout`, and must
/// produce exactly one outcome even if several underlying events race.
/// Completed fetches go into `timings`, the record of the scan the probe
/// belongs to.
#[async_trait]
pub trait ProbeChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn probe(&self, target: &ProbeTarget, timeout: Duration, timings: &TimingStore) -> ProbeOutcome;
}

pub(crate) fn http_client(purpose: &str) -> Option<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("netsweep/", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build();

    match client {
        Ok(client) => Some(client),
        Err(e) => {
            let err = ScanError::UnsupportedEnvironment(format!("an HTTP client for {purpose}"));
            warn!("{err} ({e}), these probes will always report {}", Signal::Error);
            None
        }
    }
}

pub(crate) fn unsupported(target: &ProbeTarget) -> ProbeOutcome {
    ProbeOutcome::new(target.clone(), Duration::ZERO, Signal::Error)
        .with_detail("primitive unavailable in this environment")
}
