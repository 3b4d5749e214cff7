//! Core functionality for actual scanning behaviour.
//!
//! [`Scanner`] expands the requested range, hands the targets to a
//! [`ConnectionScheduler`] running the chosen channel, classifies each outcome
//! as it completes and finally lets the timing record upgrade results the
//! heuristics could not settle.
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use futures::{stream, Stream};
use itertools::Itertools;
use log::{debug, info, warn};

use crate::address::{expand_address_range_with_limit, expand_port_range, resolve_host, subnet_sweep_range};
use crate::candidate::{extract_connection_info, ConnectionInfo};
use crate::classifier::{upgrade_with_timings, ResultClassifier, ScanMode, ScanResult};
use crate::config::ScanConfig;
use crate::discovery::{AddressDiscovery, StunDiscovery};
use crate::error::ScanError;
use crate::probe::{
    ChannelKind, HeadRequestChannel, OpaqueFetchChannel, ProbeChannel, ProbeOutcome, ResourceLoadChannel,
    SocketHandshakeChannel,
};
use crate::scheduler::{ConnectionPool, ConnectionScheduler, SchedulePolicy, ScanSession};

mod targets;
use targets::{host_targets, PortPlan};

struct Channels {
    head: Arc<dyn ProbeChannel>,
    socket: Arc<dyn ProbeChannel>,
    fetch: Arc<dyn ProbeChannel>,
    resource: Arc<dyn ProbeChannel>,
}

impl Channels {
    fn new() -> Self {
        Self {
            head: Arc::new(HeadRequestChannel::new()),
            socket: Arc::new(SocketHandshakeChannel),
            fetch: Arc::new(OpaqueFetchChannel::new()),
            resource: Arc::new(ResourceLoadChannel),
        }
    }

    fn get(&self, kind: ChannelKind) -> &dyn ProbeChannel {
        match kind {
            ChannelKind::Head => self.head.as_ref(),
            ChannelKind::Socket => self.socket.as_ref(),
            ChannelKind::Fetch => self.fetch.as_ref(),
            ChannelKind::Resource => self.resource.as_ref(),
        }
    }

    fn slot(&mut self, kind: ChannelKind) -> &mut Arc<dyn ProbeChannel> {
        match kind {
            ChannelKind::Head => &mut self.head,
            ChannelKind::Socket => &mut self.socket,
            ChannelKind::Fetch => &mut self.fetch,
            ChannelKind::Resource => &mut self.resource,
        }
    }
}

/// Entry point for host discovery and port scans.
///
/// Scans may run concurrently on one scanner. They share the socket
/// connection pool, while each keeps its own timing record.
pub struct Scanner {
    config: ScanConfig,
    classifier: ResultClassifier,
    channels: Channels,
    pool: ConnectionPool,
    discovery: Arc<dyn AddressDiscovery>,
}

impl Scanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            classifier: ResultClassifier::new(config.thresholds()),
            channels: Channels::new(),
            pool: ConnectionPool::new(config.pool_cap),
            discovery: Arc::new(StunDiscovery::new(
                config.stun_server.clone(),
                config.discovery_timeout(),
            )),
            config,
        }
    }

    /// Replaces the channel used for `kind`.
    #[must_use]
    pub fn with_channel(mut self, kind: ChannelKind, channel: Arc<dyn ProbeChannel>) -> Self {
        *self.channels.slot(kind) = channel;
        self
    }

    #[must_use]
    pub fn with_discovery(mut self, discovery: Arc<dyn AddressDiscovery>) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Addresses this machine is reachable on, one entry per candidate the
    /// discovery provider reported.
    pub async fn discover_local_addresses(&self) -> Vec<ConnectionInfo> {
        let candidates = self.discovery.gather_candidates().await;
        let infos = candidates
            .iter()
            .filter_map(|line| extract_connection_info(line))
            .collect::<Vec<_>>();
        debug!("Discovered {} addresses from {} candidates", infos.len(), candidates.len());
        infos
    }

    /// Probes every address of `range` with `kind` and classifies the outcomes
    /// for `mode`.
    pub async fn scan_range(&self, range: &str, mode: ScanMode, kind: ChannelKind) -> Result<Vec<ScanResult>, ScanError> {
        let timeout = match mode {
            ScanMode::HostDiscovery => self.config.timeout_for(kind),
            ScanMode::PortScan => self.config.port_scan_timeout(),
        };
        self.scan_range_with_timeout(range, mode, kind, timeout).await
    }

    /// Host discovery over `range`. `timeout` overrides the channel's
    /// configured timeout.
    pub async fn scan_hosts_by_range(
        &self,
        range: &str,
        kind: ChannelKind,
        timeout: Option<Duration>,
    ) -> Result<Vec<ScanResult>, ScanError> {
        let timeout = timeout.unwrap_or_else(|| self.config.timeout_for(kind));
        self.scan_range_with_timeout(range, ScanMode::HostDiscovery, kind, timeout)
            .await
    }

    /// Port scan of a single host.
    ///
    /// Blocked ports are reported first, without a connection attempt. Ports
    /// 21 and 22 are tried as `ftp://` resource loads instead, and their
    /// results arrive interleaved with the others as they complete.
    pub async fn scan_ports_on_host(&self, host: &str, port_list: &str, kind: ChannelKind) -> Result<Vec<ScanResult>, ScanError> {
        let ports = expand_port_range(port_list)?;
        let ip = resolve_host(host).await?;
        let plan = PortPlan::new(ip, &ports, kind.host_scheme());
        info!("Scanning {} ports of {host} ({ip}) with {kind:?}", ports.len());
        debug!(
            "Port scan of {ip}: {} ports, {} blocked, {} over ftp",
            plan.len(),
            plan.blocked.len(),
            plan.ftp.len()
        );

        let mut session = ScanSession::new(plan.len());
        for target in &plan.blocked {
            session.record(self.classifier.blocked(target));
        }

        let timeout = self.config.port_scan_timeout();
        let regular = ConnectionScheduler::new(self.policy_for(kind), timeout);
        let ftp = ConnectionScheduler::new(SchedulePolicy::Unbounded, timeout);
        let outcomes = stream::select(
            regular.outcomes(plan.regular, self.channels.get(kind), session.timings()),
            ftp.outcomes(plan.ftp, self.channels.get(ChannelKind::Resource), session.timings()),
        );
        self.record(&mut session, outcomes, ScanMode::PortScan).await;

        let results = finish(session, ScanMode::PortScan);
        info!("Finished port scan of {host}: {}", summarize(&results));
        Ok(results)
    }

    /// Discovers the local addresses and sweeps the /24 around each of them.
    ///
    /// Sub-scans run concurrently. One whose range cannot be expanded is
    /// logged and contributes no results.
    pub async fn scan_local_network(&self, kind: ChannelKind) -> Vec<ScanResult> {
        let infos = self.discover_local_addresses().await;
        let ranges = infos
            .iter()
            .map(|info| info.ip)
            .unique()
            .map(subnet_sweep_range)
            .unique()
            .collect::<Vec<_>>();
        debug!("Sweeping local networks {ranges:?}");

        let mut sweeps = Vec::with_capacity(ranges.len());
        for range in &ranges {
            match self.expand(range) {
                Ok(ips) => sweeps.push(host_targets(&ips, kind.host_scheme())),
                Err(e) => warn!("Skipping local network {range}: {e}"),
            }
        }

        let timeout = self.config.timeout_for(kind);
        let schedulers = sweeps
            .iter()
            .map(|_| ConnectionScheduler::new(self.policy_for(kind), timeout))
            .collect::<Vec<_>>();
        let mut session = ScanSession::new(sweeps.iter().map(Vec::len).sum());
        let outcomes = stream::select_all(
            schedulers
                .iter()
                .zip(sweeps)
                .map(|(scheduler, targets)| scheduler.outcomes(targets, self.channels.get(kind), session.timings())),
        );
        self.record(&mut session, outcomes, ScanMode::HostDiscovery).await;

        let results = finish(session, ScanMode::HostDiscovery);
        info!("Finished local network scan: {}", summarize(&results));
        results
    }

    async fn scan_range_with_timeout(
        &self,
        range: &str,
        mode: ScanMode,
        kind: ChannelKind,
        timeout: Duration,
    ) -> Result<Vec<ScanResult>, ScanError> {
        let ips = self.expand(range)?;
        info!("Scanning {} addresses of {range} with {kind:?}", ips.len());

        let mut session = ScanSession::new(ips.len());
        let scheduler = ConnectionScheduler::new(self.policy_for(kind), timeout);
        let outcomes = scheduler.outcomes(
            host_targets(&ips, kind.host_scheme()),
            self.channels.get(kind),
            session.timings(),
        );
        self.record(&mut session, outcomes, mode).await;

        let results = finish(session, mode);
        info!("Finished {range}: {}", summarize(&results));
        Ok(results)
    }

    fn expand(&self, range: &str) -> Result<Vec<Ipv4Addr>, ScanError> {
        expand_address_range_with_limit(range, self.config.max_expanded_addresses)
    }

    async fn record<S>(&self, session: &mut ScanSession, outcomes: S, mode: ScanMode)
    where
        S: Stream<Item = ProbeOutcome> + Unpin,
    {
        session
            .record_all(outcomes, |outcome| {
                let result = self.classifier.classify_outcome(outcome, mode);
                debug!("{result}");
                result
            })
            .await;
        debug!("Session recorded {} of {} results", session.completed(), session.total());
    }

    fn policy_for(&self, kind: ChannelKind) -> SchedulePolicy {
        match kind {
            ChannelKind::Socket => SchedulePolicy::PoolRefill {
                pool: self.pool.clone(),
                interval: self.config.pool_interval(),
            },
            ChannelKind::Resource => SchedulePolicy::Throttled {
                max_in_flight: self.config.max_concurrent_loads,
                interval: self.config.load_interval(),
            },
            ChannelKind::Head | ChannelKind::Fetch => SchedulePolicy::Unbounded,
        }
    }
}

/// Hands back the results of `session`, upgrading those its timing record
/// vouches for.
fn finish(session: ScanSession, mode: ScanMode) -> Vec<ScanResult> {
    let entries = session.timings().resource_entries();
    let mut results = session.into_results();
    let upgraded = upgrade_with_timings(&mut results, &entries, mode.positive_status());
    if upgraded > 0 {
        debug!("Timing record upgraded {upgraded} results");
    }
    results
}

/// Counts per status, e.g. `3 up, 250 down`.
fn summarize(results: &[ScanResult]) -> String {
    let counts = results.iter().map(|r| r.status).counts();
    if counts.is_empty() {
        return "no results".to_owned();
    }
    counts
        .into_iter()
        .sorted_by_key(|(status, _)| status.as_str())
        .map(|(status, n)| format!("{n} {status}"))
        .join(", ")
}
