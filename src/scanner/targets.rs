//! Builds the probe targets of a scan.
use std::net::Ipv4Addr;

use crate::classifier::{has_ftp_fallback, is_blocked_port};
use crate::probe::{ProbeTarget, Scheme};

/// One target per address, on the scheme's implicit port.
pub(super) fn host_targets(ips: &[Ipv4Addr], scheme: Scheme) -> Vec<ProbeTarget> {
    ips.iter()
        .map(|&ip| ProbeTarget::new(scheme, ip, None))
        .collect()
}

/// The ports of a port scan split by how they are handled.
#[derive(Debug, Default, PartialEq, Eq)]
pub(super) struct PortPlan {
    /// Never dispatched.
    pub blocked: Vec<ProbeTarget>,
    /// Blocked ports retried as `ftp://` resource loads.
    pub ftp: Vec<ProbeTarget>,
    /// Probed through the requested channel.
    pub regular: Vec<ProbeTarget>,
}

impl PortPlan {
    pub fn new(ip: Ipv4Addr, ports: &[u16], scheme: Scheme) -> Self {
        let mut plan = Self::default();
        for &port in ports {
            if has_ftp_fallback(port) {
                plan.ftp.push(ProbeTarget::new(Scheme::Ftp, ip, Some(port)));
            } else if is_blocked_port(port) {
                plan.blocked.push(ProbeTarget::new(scheme, ip, Some(port)));
            } else {
                plan.regular.push(ProbeTarget::new(scheme, ip, Some(port)));
            }
        }
        plan
    }

    pub fn len(&self) -> usize {
        self.blocked.len() + self.ftp.len() + self.regular.len()
    }
}
