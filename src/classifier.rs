//! Turns probe outcomes into scan results.
//!
//! Host discovery relies on a timing window: unreachable hosts tend to fail
//! either distinctly fast or distinctly slow compared to a normal local
//! answer. Port scans treat a probe that hangs until the timeout as open,
//! since the remote side accepted and held the connection.
use std::fmt;
use std::time::Duration;

use serde_derive::Serialize;

use crate::probe::{ProbeOutcome, ProbeTarget, Signal};
use crate::timing::{normalize_address, TimingEntry};

/// Ports that the network stack policy refuses to connect to.
pub const BLOCKED_PORTS: [u16; 64] = [
    1, 7, 9, 11, 13, 15, 17, 19, 20, 21, 22, 23, 25, 37, 42, 43, 53, 77, 79, 87, 95, 101, 102, 103,
    104, 109, 110, 111, 113, 115, 117, 119, 123, 135, 139, 143, 179, 389, 465, 512, 513, 514, 515,
    526, 530, 531, 532, 540, 556, 563, 587, 601, 636, 993, 995, 2049, 3659, 4045, 6000, 6665, 6666,
    6667, 6668, 6669,
];

/// Blocked ports that can still be reached through an `ftp://` resource load.
pub const FTP_FALLBACK_PORTS: [u16; 2] = [21, 22];

pub const BLOCKED_INFO: &str = "port is blocked by the network stack policy, cannot determine status";
pub const TIMING_RECORD_SUFFIX: &str = ", PERF-TIMING CONNECTION RECORD";

pub fn is_blocked_port(port: u16) -> bool {
    BLOCKED_PORTS.contains(&port)
}

/// True for blocked ports that are retried over `ftp://`.
pub fn has_ftp_fallback(port: u16) -> bool {
    FTP_FALLBACK_PORTS.contains(&port)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Down,
    Open,
    Closed,
    Blocked,
    Unknown,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Blocked => "blocked",
            Self::Unknown => "unknown",
        }
    }

    /// Statuses the timing record may upgrade.
    pub fn is_ambiguous(self) -> bool {
        matches!(self, Self::Down | Self::Closed | Self::Unknown)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanMode {
    HostDiscovery,
    PortScan,
}

impl ScanMode {
    /// Status that means "something answered" in this mode.
    pub fn positive_status(self) -> Status {
        match self {
            Self::HostDiscovery => Status::Up,
            Self::PortScan => Status::Open,
        }
    }
}

/// One classified target, the unit handed back to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub address: String,
    pub duration_ms: f64,
    pub status: Status,
    pub info: String,
}

impl fmt::Display for ScanResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ScanResult for '{}', duration: {:.2}, status: {}, info: {}",
            self.address, self.duration_ms, self.status, self.info
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Host discovery answers faster than this count as up.
    pub lower_bound: Duration,
    /// Host discovery answers slower than this count as up.
    pub upper_bound: Duration,
    /// Port probes reaching this elapsed time count as open.
    pub port_scan_timeout: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            lower_bound: Duration::from_millis(2900),
            upper_bound: Duration::from_millis(10_000),
            port_scan_timeout: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResultClassifier {
    thresholds: Thresholds,
}

impl ResultClassifier {
    pub fn new(thresholds: Thresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Maps an elapsed time and signal to a status and info text.
    pub fn classify(&self, elapsed: Duration, signal: Signal, mode: ScanMode) -> (Status, String) {
        if signal == Signal::Blocked {
            return (Status::Blocked, BLOCKED_INFO.to_owned());
        }

        let status = match mode {
            ScanMode::HostDiscovery => {
                let outside_window =
                    elapsed < self.thresholds.lower_bound || elapsed > self.thresholds.upper_bound;
                if outside_window || signal.is_evidence_of_life() {
                    Status::Up
                } else {
                    Status::Down
                }
            }
            ScanMode::PortScan => {
                if elapsed >= self.thresholds.port_scan_timeout || signal.is_evidence_of_life() {
                    Status::Open
                } else {
                    Status::Closed
                }
            }
        };
        (status, signal.message().to_owned())
    }

    pub fn classify_outcome(&self, outcome: &ProbeOutcome, mode: ScanMode) -> ScanResult {
        let (status, mut info) = self.classify(outcome.elapsed, outcome.signal, mode);
        if let Some(detail) = &outcome.detail {
            info = format!("{info} ({detail})");
        }
        ScanResult {
            address: outcome.target.url(),
            duration_ms: outcome.elapsed_ms(),
            status,
            info,
        }
    }

    /// Result for a target that is never dispatched.
    pub fn blocked(&self, target: &ProbeTarget) -> ScanResult {
        ScanResult {
            address: target.url(),
            duration_ms: 0.0,
            status: Status::Blocked,
            info: BLOCKED_INFO.to_owned(),
        }
    }
}

/// Upgrades ambiguous results to `positive` when a timing entry proves a
/// response arrived from the same address. Each entry upgrades at most one
/// result. Returns how many were upgraded.
pub fn upgrade_with_timings(
    results: &mut [ScanResult],
    entries: &[TimingEntry],
    positive: Status,
) -> usize {
    let mut upgraded = 0;
    for entry in entries.iter().filter(|e| e.transferred()) {
        let name = normalize_address(&entry.name);
        let candidate = results.iter_mut().find(|r| {
            r.status != positive
                && r.status.is_ambiguous()
                && normalize_address(&r.address) == name
        });
        if let Some(result) = candidate {
            result.status = positive;
            result.info.push_str(TIMING_RECORD_SUFFIX);
            upgraded += 1;
        }
    }
    upgraded
}
