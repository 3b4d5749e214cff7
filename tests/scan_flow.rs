use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use netsweep::classifier::{ResultClassifier, BLOCKED_INFO};
use netsweep::config::ScanConfig;
use netsweep::discovery::AddressDiscovery;
use netsweep::probe::{ChannelKind, ProbeChannel, ProbeGuard, ProbeOutcome, ProbeTarget, Signal};
use netsweep::timing::TimingStore;
use netsweep::{ScanMode, ScanResult, Scanner, Status};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Records every dispatched URL and answers with a fixed signal.
struct SpyChannel {
    kind: ChannelKind,
    signal: Signal,
    calls: Mutex<Vec<String>>,
}

impl SpyChannel {
    fn new(kind: ChannelKind, signal: Signal) -> Arc<Self> {
        Arc::new(Self {
            kind,
            signal,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }
}

#[async_trait]
impl ProbeChannel for SpyChannel {
    fn kind(&self) -> ChannelKind {
        self.kind
    }

    async fn probe(&self, target: &ProbeTarget, _timeout: Duration, _timings: &TimingStore) -> ProbeOutcome {
        self.calls.lock().unwrap().push(target.url());
        ProbeOutcome::new(target.clone(), Duration::from_millis(1), self.signal)
    }
}

/// Never produces an outcome on its own.
struct HangingChannel;

#[async_trait]
impl ProbeChannel for HangingChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Head
    }

    async fn probe(&self, _target: &ProbeTarget, _timeout: Duration, _timings: &TimingStore) -> ProbeOutcome {
        std::future::pending().await
    }
}

/// Fires an error event and its timeout in the same tick.
struct RacingChannel;

#[async_trait]
impl ProbeChannel for RacingChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Socket
    }

    async fn probe(&self, target: &ProbeTarget, _timeout: Duration, _timings: &TimingStore) -> ProbeOutcome {
        let (guard, pending) = ProbeGuard::start(target.clone());
        let error = guard.clone();
        let timer = guard.clone();
        tokio::join!(
            async move { error.resolve(Signal::Error, Some("refused".into())) },
            async move { timer.resolve(Signal::TimedOut, None) },
        );
        pending.wait().await
    }
}

struct FixedDiscovery(Vec<&'static str>);

#[async_trait]
impl AddressDiscovery for FixedDiscovery {
    async fn gather_candidates(&self) -> Vec<String> {
        self.0.iter().map(ToString::to_string).collect()
    }
}

fn addresses(results: &[ScanResult]) -> HashSet<String> {
    results.iter().map(|r| r.address.clone()).collect()
}

#[tokio::test]
async fn every_target_yields_exactly_one_result() -> anyhow::Result<()> {
    init_logger();
    let channel = SpyChannel::new(ChannelKind::Head, Signal::Error);
    let scanner = Scanner::new(ScanConfig::default()).with_channel(ChannelKind::Head, channel.clone());

    let results = scanner
        .scan_range("10.20.0-1.0-99", ScanMode::HostDiscovery, ChannelKind::Head)
        .await?;

    assert_eq!(results.len(), 200);
    assert_eq!(addresses(&results).len(), 200);
    assert_eq!(channel.calls().len(), 200);
    Ok(())
}

#[tokio::test]
async fn blocked_ports_are_never_dispatched() -> anyhow::Result<()> {
    init_logger();
    let fetch = SpyChannel::new(ChannelKind::Fetch, Signal::Error);
    let resource = SpyChannel::new(ChannelKind::Resource, Signal::Error);
    let scanner = Scanner::new(ScanConfig::default())
        .with_channel(ChannelKind::Fetch, fetch.clone())
        .with_channel(ChannelKind::Resource, resource.clone());

    let results = scanner
        .scan_ports_on_host("127.0.0.1", "21,22,23,25,80,8080", ChannelKind::Fetch)
        .await?;

    assert_eq!(results.len(), 6);
    assert_eq!(
        fetch.calls(),
        ["http://127.0.0.1:80", "http://127.0.0.1:8080"]
    );
    assert_eq!(
        resource.calls(),
        ["ftp://127.0.0.1:21", "ftp://127.0.0.1:22"]
    );

    let blocked = results
        .iter()
        .filter(|r| r.status == Status::Blocked)
        .collect::<Vec<_>>();
    assert_eq!(blocked.len(), 2);
    assert!(blocked.iter().all(|r| r.info == BLOCKED_INFO));
    Ok(())
}

#[tokio::test]
async fn hanging_channel_is_bounded_by_timeout() -> anyhow::Result<()> {
    init_logger();
    let scanner = Scanner::new(ScanConfig::default()).with_channel(ChannelKind::Head, Arc::new(HangingChannel));

    let start = Instant::now();
    let results = scanner
        .scan_hosts_by_range("10.0.0.1-5", ChannelKind::Head, Some(Duration::from_millis(100)))
        .await?;

    assert_eq!(results.len(), 5);
    assert!(start.elapsed() < Duration::from_secs(3));
    assert!(results.iter().all(|r| r.info.starts_with("NETWORK TIMEOUT")));
    Ok(())
}

#[tokio::test]
async fn racing_events_deliver_one_outcome() -> anyhow::Result<()> {
    init_logger();
    let config = ScanConfig {
        pool_cap: 4,
        pool_interval_ms: 5,
        ..ScanConfig::default()
    };
    let scanner = Scanner::new(config).with_channel(ChannelKind::Socket, Arc::new(RacingChannel));

    let results = scanner
        .scan_hosts_by_range("10.0.0.1-20", ChannelKind::Socket, None)
        .await?;

    assert_eq!(results.len(), 20);
    assert_eq!(addresses(&results).len(), 20);
    assert!(results.iter().all(|r| r.info == "NETWORK ERROR (refused)"));
    Ok(())
}

#[test]
fn connected_host_is_up_regardless_of_timing() {
    let classifier = ResultClassifier::default();
    let (status, _) = classifier.classify(Duration::from_millis(50), Signal::Connected, ScanMode::HostDiscovery);
    assert_eq!(status, Status::Up);
}

#[tokio::test]
async fn local_network_sweeps_each_prefix_once() {
    init_logger();
    let discovery = FixedDiscovery(vec![
        "candidate:0 1 UDP 2122252543 10.1.2.3 50000 typ host",
        "candidate:1 1 UDP 1686052607 80.110.26.244 50774 typ srflx raddr 10.1.2.3 rport 50000",
        "candidate:0 1 UDP 2122252543 10.1.2.77 50001 typ host",
        "candidate:0 1 UDP 2122252543 10.5.0.1 50002 typ host",
        "a=ice-ufrag:ignored",
    ]);
    let channel = SpyChannel::new(ChannelKind::Fetch, Signal::Error);
    let scanner = Scanner::new(ScanConfig::default())
        .with_channel(ChannelKind::Fetch, channel.clone())
        .with_discovery(Arc::new(discovery));

    let infos = scanner.discover_local_addresses().await;
    assert_eq!(infos.len(), 4);
    assert_eq!(infos[1].public_ip, Some(Ipv4Addr::new(80, 110, 26, 244)));

    let results = scanner.scan_local_network(ChannelKind::Fetch).await;

    assert_eq!(results.len(), 512);
    assert_eq!(addresses(&results).len(), 512);
    assert!(results.iter().any(|r| r.address == "http://10.1.2.255"));
    assert!(results.iter().any(|r| r.address == "http://10.5.0.0"));
}

#[tokio::test]
async fn no_discovered_addresses_means_no_results() {
    let scanner = Scanner::new(ScanConfig::default()).with_discovery(Arc::new(FixedDiscovery(Vec::new())));
    assert!(scanner.scan_local_network(ChannelKind::Fetch).await.is_empty());
}

async fn spawn_server(response: &'static [u8], read_first: bool) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            if read_first {
                let mut buf = [0u8; 1024];
                let _ = stream.read(&mut buf).await;
            }
            let _ = stream.write_all(response).await;
        }
    });
    port
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn resource_loads_against_loopback() -> anyhow::Result<()> {
    init_logger();
    let open = spawn_server(b"HTTP/1.0 200 OK\r\n\r\n", true).await;
    let closed = closed_port().await;
    let config = ScanConfig {
        port_scan_timeout_ms: 2000,
        load_interval_ms: 10,
        ..ScanConfig::default()
    };
    let scanner = Scanner::new(config);

    let results = scanner
        .scan_ports_on_host("127.0.0.1", &format!("{open},{closed}"), ChannelKind::Resource)
        .await?;

    let status = |port: u16| {
        results
            .iter()
            .find(|r| r.address == format!("http://127.0.0.1:{port}"))
            .map(|r| r.status)
    };
    assert_eq!(status(open), Some(Status::Open));
    assert_eq!(status(closed), Some(Status::Closed));
    Ok(())
}

#[tokio::test]
async fn socket_handshakes_against_loopback() -> anyhow::Result<()> {
    init_logger();
    let upgrade = spawn_server(
        b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n",
        true,
    )
    .await;
    let closed = closed_port().await;
    let config = ScanConfig {
        port_scan_timeout_ms: 2000,
        pool_interval_ms: 10,
        ..ScanConfig::default()
    };
    let scanner = Scanner::new(config);

    let results = scanner
        .scan_ports_on_host("127.0.0.1", &format!("{upgrade},{closed}"), ChannelKind::Socket)
        .await?;

    assert_eq!(results.len(), 2);
    let open = results
        .iter()
        .find(|r| r.address.ends_with(&format!(":{upgrade}")))
        .unwrap();
    assert!(open.address.starts_with("ws://"));
    assert_eq!(open.status, Status::Open);
    assert_eq!(open.info, "CONNECTION OPENED");
    assert_eq!(scanner.pool().in_use(), 0);
    Ok(())
}

#[test]
fn results_serialize_for_callers() -> anyhow::Result<()> {
    let result = ScanResult {
        address: "http://10.0.0.1:80".into(),
        duration_ms: 12.5,
        status: Status::Open,
        info: "DATA RECEIVED".into(),
    };
    let json = serde_json::to_value(&result)?;
    assert_eq!(json["address"], "http://10.0.0.1:80");
    assert_eq!(json["durationMs"], 12.5);
    assert_eq!(json["status"], "open");
    Ok(())
}
