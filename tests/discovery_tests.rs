//! Subnet enumeration, device merging and the scan orchestrator

use argus::config::{DetailConfig, ScanConfig};
use argus::discovery::{
    Device, DeviceInspector, DeviceKind, NeighborMap, NeighborhoodScanner, ScanEvent, ScanPhase,
    StaticNeighborTable, Subnet,
};
use argus::enrich::parse_mac;
use argus::network::{EchoOutcome, EchoReply, Prober, ReplyKind};
use argus::ScanError;
use async_trait::async_trait;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::TryRecvError;

/// Answers for a fixed set of hosts, optionally after a delay
struct LiveHosts {
    alive: HashSet<Ipv4Addr>,
    delay: Duration,
}

impl LiveHosts {
    fn new(alive: &[Ipv4Addr]) -> Self {
        Self {
            alive: alive.iter().copied().collect(),
            delay: Duration::ZERO,
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Prober for LiveHosts {
    async fn probe(&self, target: Ipv4Addr, _ttl: Option<u8>, _timeout: Duration) -> EchoOutcome {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.alive.contains(&target) {
            EchoOutcome::Reply(EchoReply {
                rtt: Duration::from_millis(4),
                responder: target,
                kind: ReplyKind::EchoReply,
            })
        } else {
            EchoOutcome::Timeout
        }
    }
}

fn ip(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

fn scan_config() -> ScanConfig {
    ScanConfig {
        prime_port: 9,
        ping_timeout: 50,
        ..ScanConfig::default()
    }
    .with_settle(0)
    .with_hostnames(false)
    .with_service_window(0)
}

fn neighbors(entries: &[(Ipv4Addr, &str)]) -> StaticNeighborTable {
    let map: NeighborMap = entries
        .iter()
        .map(|(ip, mac)| (*ip, parse_mac(mac).expect("valid mac")))
        .collect();
    StaticNeighborTable::new(map)
}

#[test]
fn test_class_c_enumeration() {
    let subnet = Subnet::from_cidr("10.0.0.5/24").unwrap();
    let hosts = subnet.candidates(1022).unwrap();

    assert_eq!(hosts.len(), 253);
    assert_eq!(hosts.first(), Some(&ip(1)));
    assert_eq!(hosts.last(), Some(&ip(254)));
    assert!(!hosts.contains(&ip(5)));
    assert_eq!(subnet.to_string(), "10.0.0.0/24");
}

#[test]
fn test_oversized_subnet_is_refused() {
    let subnet = Subnet::from_cidr("172.16.4.20/16").unwrap();
    assert!(subnet.hosts().is_empty());
    match subnet.candidates(1022) {
        Err(ScanError::CapacityExceeded { hosts, cap }) => {
            assert_eq!(hosts, 65534);
            assert_eq!(cap, 1022);
        }
        other => panic!("expected CapacityExceeded, got {:?}", other),
    }
}

#[test]
fn test_merge_is_idempotent() {
    let mac = parse_mac("b8:27:eb:01:02:03").unwrap();
    let update = Device::new(ip(7))
        .with_mac(mac, "Raspberry Pi Foundation")
        .with_hostname("pi.lan")
        .with_services(["SSH"]);

    let mut once = Device::new(ip(7)).with_latency(2.5);
    once.merge(update.clone());
    let mut twice = once.clone();
    twice.merge(update);

    assert_eq!(once, twice);
    assert_eq!(twice.latency_ms, Some(2.5));
    assert_eq!(twice.hostname.as_deref(), Some("pi.lan"));

    // Absent fields never clear known ones
    twice.merge(Device::new(ip(7)));
    assert_eq!(once, twice);
}

#[tokio::test]
async fn test_scan_finds_ping_and_neighbor_only_devices() {
    let prober = Arc::new(LiveHosts::new(&[ip(2), ip(3)]));
    let table = neighbors(&[
        (ip(2), "b8:27:eb:00:00:02"),
        // Silent to ping but present in the neighbor table
        (ip(9), "00:0c:29:00:00:09"),
        // Outside the subnet and the scanner itself
        (Ipv4Addr::new(192, 168, 50, 1), "00:0c:29:00:00:01"),
        (ip(5), "00:0c:29:00:00:05"),
    ]);
    let scanner = NeighborhoodScanner::with_neighbor_table(prober, table, scan_config());
    let mut events = scanner.subscribe();

    let subnet = Subnet::from_cidr("10.0.0.5/27").unwrap();
    let report = scanner.scan_subnet(subnet).await.unwrap();

    assert!(!report.stopped);
    assert_eq!(report.candidates, 29);
    assert_eq!(report.probed, 29);
    assert_eq!(scanner.phase(), ScanPhase::Done);

    let found: Vec<Ipv4Addr> = report.devices.iter().map(|d| d.ip).collect();
    assert_eq!(found, vec![ip(2), ip(3), ip(9)]);

    let pinged = &report.devices[0];
    assert_eq!(pinged.vendor.as_deref(), Some("Raspberry Pi Foundation"));
    assert!(pinged.latency_ms.is_some());

    let arp_only = &report.devices[2];
    assert_eq!(arp_only.latency_ms, None);
    assert_eq!(arp_only.vendor.as_deref(), Some("VMware"));

    let mut phases = Vec::new();
    let mut started = false;
    loop {
        match events.try_recv() {
            Ok(ScanEvent::Phase(phase)) => phases.push(phase),
            Ok(ScanEvent::Started { candidates, .. }) => {
                assert_eq!(candidates, 29);
                started = true;
            }
            Ok(_) => {}
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(n)) => panic!("lagged by {}", n),
        }
    }
    assert!(started);
    assert_eq!(
        phases,
        vec![
            ScanPhase::Priming,
            ScanPhase::Sweeping,
            ScanPhase::Reconciling,
            ScanPhase::Enriching,
            ScanPhase::Done,
        ]
    );
}

#[tokio::test]
async fn test_stop_ends_scan_early() {
    let prober = Arc::new(LiveHosts::new(&[ip(2)]).slow(Duration::from_millis(100)));
    let mut config = scan_config();
    config.sweep_concurrency = 1;
    let scanner = Arc::new(NeighborhoodScanner::with_neighbor_table(
        prober,
        StaticNeighborTable::default(),
        config,
    ));
    let subnet = Subnet::from_cidr("10.0.0.5/24").unwrap();

    let running = {
        let scanner = scanner.clone();
        tokio::spawn(async move { scanner.scan_subnet(subnet).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while scanner.phase() != ScanPhase::Sweeping {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("sweep should start");

    // A second scan on the same scanner is refused while one runs
    let second = scanner.scan_subnet(subnet).await;
    assert!(matches!(second, Err(ScanError::ScanInProgress)));

    scanner.stop();
    let report = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("stopped scan should return")
        .unwrap()
        .unwrap();

    assert!(report.stopped);
    assert!(report.probed < report.candidates);
    assert_eq!(scanner.phase(), ScanPhase::Stopped);
    assert!(!report.phase_ms.contains_key(&ScanPhase::Enriching));

    // The scanner accepts a new scan once the first has ended
    let small = Subnet::from_cidr("10.0.0.5/30").unwrap();
    let report = scanner.scan_subnet(small).await.unwrap();
    assert!(!report.stopped);
}

#[tokio::test]
async fn test_stop_interrupts_service_window() {
    let config = scan_config().with_service_window(60_000);
    let scanner = Arc::new(NeighborhoodScanner::with_neighbor_table(
        Arc::new(LiveHosts::new(&[ip(2)])),
        StaticNeighborTable::default(),
        config,
    ));
    let subnet = Subnet::from_cidr("10.0.0.5/29").unwrap();

    let running = {
        let scanner = scanner.clone();
        tokio::spawn(async move { scanner.scan_subnet(subnet).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while !matches!(scanner.phase(), ScanPhase::Enriching | ScanPhase::Done) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("enrichment should start");

    scanner.stop();
    let report = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("stop must not wait out the service window")
        .unwrap()
        .unwrap();

    // Without multicast the window ends early and the scan completes on its own
    assert_eq!(report.stopped, scanner.phase() == ScanPhase::Stopped);
    assert!(report.devices.iter().any(|d| d.ip == ip(2)));
}

#[tokio::test]
async fn test_inspect_device() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let localhost = Ipv4Addr::LOCALHOST;

    let config = DetailConfig {
        ping_count: 4,
        ping_interval: 0,
        ping_timeout: 50,
        ports: vec![port],
        port_timeout: 500,
        service_window: 0,
        dns_timeout: 200,
        ..DetailConfig::default()
    };
    let inspector = DeviceInspector::with_neighbor_table(
        Arc::new(LiveHosts::new(&[localhost])),
        neighbors(&[(localhost, "b8:27:eb:aa:bb:cc")]),
        config,
    );

    let report = inspector.inspect(localhost).await.unwrap();

    assert_eq!(report.ping.sent, 4);
    assert_eq!(report.ping.received, 4);
    assert_eq!(report.ping.loss_percent, 0.0);
    assert_eq!(report.open_ports.len(), 1);
    assert_eq!(report.open_ports[0].port, port);
    assert_eq!(report.vendor.as_deref(), Some("Raspberry Pi Foundation"));
    assert_eq!(report.kind, DeviceKind::IoT);
    assert!(report.services.is_empty());
}
