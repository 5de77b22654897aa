//! Hop discovery and monitoring against a simulated path

use argus::config::TraceConfig;
use argus::network::{EchoOutcome, EchoReply, ProbeTarget, Prober, ReplyKind};
use argus::trace::{Hop, HopDiscoverer};
use argus::ScanError;
use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DESTINATION: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 9);

fn router(ttl: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, ttl, 1)
}

/// A path of `length` hops: routers answer with time exceeded, the
/// destination with an echo reply once the TTL reaches it
struct SimulatedPath {
    length: u8,
    silent_ttls: HashSet<u8>,
    /// Routers that stop answering once monitoring starts
    lossy: HashSet<Ipv4Addr>,
    /// Destinations whose probes take this long
    slow: Option<(Ipv4Addr, Duration)>,
    probes: AtomicU64,
}

impl SimulatedPath {
    fn new(length: u8) -> Self {
        Self {
            length,
            silent_ttls: HashSet::new(),
            lossy: HashSet::new(),
            slow: None,
            probes: AtomicU64::new(0),
        }
    }

    fn silent_at(mut self, ttl: u8) -> Self {
        self.silent_ttls.insert(ttl);
        self
    }

    fn lossy(mut self, ip: Ipv4Addr) -> Self {
        self.lossy.insert(ip);
        self
    }

    fn slow_for(mut self, target: Ipv4Addr, delay: Duration) -> Self {
        self.slow = Some((target, delay));
        self
    }

    fn reply(responder: Ipv4Addr, ms: u64, kind: ReplyKind) -> EchoOutcome {
        EchoOutcome::Reply(EchoReply {
            rtt: Duration::from_millis(ms),
            responder,
            kind,
        })
    }
}

#[async_trait]
impl Prober for SimulatedPath {
    async fn probe(&self, target: Ipv4Addr, ttl: Option<u8>, _timeout: Duration) -> EchoOutcome {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some((slow, delay)) = self.slow {
            if slow == target {
                tokio::time::sleep(delay).await;
            }
        }

        match ttl {
            Some(ttl) if self.silent_ttls.contains(&ttl) => EchoOutcome::Timeout,
            Some(ttl) if ttl < self.length => {
                Self::reply(router(ttl), ttl as u64 * 2, ReplyKind::TimeExceeded)
            }
            Some(ttl) => Self::reply(target, ttl as u64 * 2, ReplyKind::EchoReply),
            None if self.lossy.contains(&target) => EchoOutcome::Timeout,
            None => Self::reply(target, 3, ReplyKind::EchoReply),
        }
    }
}

fn close(value: Option<f64>, expected: f64) -> bool {
    value.map_or(false, |v| (v - expected).abs() < 1e-6)
}

fn config() -> TraceConfig {
    TraceConfig {
        max_ttl: 30,
        hop_timeout: 100,
        pace: 0,
        interval: 20,
        window: 5,
        resolve_hostnames: false,
        geolocate: false,
        ..TraceConfig::default()
    }
}

#[tokio::test]
async fn test_discovery_stops_at_destination() {
    let path = Arc::new(SimulatedPath::new(5));
    let discoverer = HopDiscoverer::new(path.clone(), config());

    let hops = discoverer.discover(&ProbeTarget::new(DESTINATION)).await.unwrap();

    assert_eq!(hops.len(), 5);
    assert!(hops.iter().all(|h| !h.is_placeholder()));
    for (i, hop) in hops.iter().enumerate() {
        assert_eq!(hop.ttl as usize, i + 1);
    }
    assert_eq!(hops[0].address, Some(router(1)));
    assert_eq!(hops[4].address, Some(DESTINATION));
    assert!(close(hops[4].discovery_rtt_ms, 10.0));
    // No probes beyond the destination's TTL
    assert_eq!(path.probes.load(Ordering::SeqCst), 5);
    assert_eq!(discoverer.target().await, Some(ProbeTarget::new(DESTINATION)));
}

#[tokio::test]
async fn test_silent_hop_becomes_placeholder() {
    let path = Arc::new(SimulatedPath::new(5).silent_at(3));
    let discoverer = HopDiscoverer::new(path, config());

    let hops = discoverer.discover(&ProbeTarget::new(DESTINATION)).await.unwrap();

    assert_eq!(hops.len(), 5);
    assert!(hops[2].is_placeholder());
    assert_eq!(hops[2].display_name(), "*");
    assert_eq!(hops[2].ttl, 3);
    assert_eq!(hops[3].address, Some(router(4)));
}

#[tokio::test]
async fn test_unreachable_destination_walks_every_ttl() {
    let mut config = config();
    config.max_ttl = 6;
    let path = Arc::new(SimulatedPath::new(40));
    let discoverer = HopDiscoverer::new(path, config);

    let hops = discoverer.discover(&ProbeTarget::new(DESTINATION)).await.unwrap();

    assert_eq!(hops.len(), 6);
    assert!(hops.iter().all(|h| h.address != Some(DESTINATION)));
}

#[tokio::test]
async fn test_monitoring_requires_discovery() {
    let discoverer = HopDiscoverer::new(Arc::new(SimulatedPath::new(3)), config());
    let err = discoverer.start_monitoring().await.unwrap_err();
    assert!(matches!(err, ScanError::InvalidTarget(_)));
    assert!(!discoverer.is_monitoring());
}

#[tokio::test]
async fn test_monitoring_tracks_loss_per_hop() {
    let path = Arc::new(SimulatedPath::new(4).silent_at(2).lossy(router(3)));
    let discoverer = HopDiscoverer::new(path, config());
    discoverer.discover(&ProbeTarget::new(DESTINATION)).await.unwrap();

    let mut updates = discoverer.subscribe();
    discoverer.start_monitoring().await.unwrap();
    assert!(discoverer.is_monitoring());

    let hops = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            updates.changed().await.unwrap();
            let hops = updates.borrow_and_update().clone();
            if hops[0].sent >= 8 {
                return hops;
            }
        }
    })
    .await
    .expect("monitoring should tick");
    discoverer.stop();
    assert!(!discoverer.is_monitoring());

    // Responding hop
    assert_eq!(hops[0].loss_percent, 0.0);
    assert!(close(hops[0].last_ms, 3.0));
    assert!(hops[0].jitter_ms.abs() < 1e-9);

    // Placeholder is never probed
    assert!(hops[1].is_placeholder());
    assert_eq!(hops[1].sent, 0);

    // Router that stopped answering
    assert_eq!(hops[2].loss_percent, 100.0);
    assert_eq!(hops[2].avg_ms, None);

    assert_eq!(hops[3].address, Some(DESTINATION));
    assert_eq!(hops[3].loss_percent, 0.0);
}

#[tokio::test]
async fn test_stop_then_restart_monitoring() {
    let discoverer = HopDiscoverer::new(Arc::new(SimulatedPath::new(3)), config());
    discoverer.discover(&ProbeTarget::new(DESTINATION)).await.unwrap();

    discoverer.start_monitoring().await.unwrap();
    // Second start is a no-op
    discoverer.start_monitoring().await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    discoverer.stop();

    tokio::time::sleep(Duration::from_millis(60)).await;
    let frozen = discoverer.snapshot().await[0].sent;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(discoverer.snapshot().await[0].sent, frozen);
    assert!(frozen > 0);

    discoverer.start_monitoring().await.unwrap();
    assert!(discoverer.is_monitoring());
    tokio::time::sleep(Duration::from_millis(100)).await;
    discoverer.stop();
    assert!(discoverer.snapshot().await[0].sent > frozen);
}

#[tokio::test]
async fn test_new_discovery_replaces_session() {
    let discoverer = HopDiscoverer::new(Arc::new(SimulatedPath::new(3)), config());
    discoverer.discover(&ProbeTarget::new(DESTINATION)).await.unwrap();
    discoverer.start_monitoring().await.unwrap();

    let other = Ipv4Addr::new(198, 51, 100, 1);
    let hops = discoverer.discover(&ProbeTarget::new(other)).await.unwrap();

    assert!(!discoverer.is_monitoring());
    assert_eq!(hops.last().and_then(|h| h.address), Some(other));
    assert!(discoverer.snapshot().await.iter().all(|h| h.sent == 0));
}

#[tokio::test]
async fn test_superseded_discovery_leaves_newer_session() {
    let other = Ipv4Addr::new(198, 51, 100, 1);
    let path = SimulatedPath::new(3).slow_for(DESTINATION, Duration::from_millis(300));
    let discoverer = Arc::new(HopDiscoverer::new(Arc::new(path), config()));

    let superseded = {
        let discoverer = discoverer.clone();
        tokio::spawn(async move { discoverer.discover(&ProbeTarget::new(DESTINATION)).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let hops = discoverer.discover(&ProbeTarget::new(other)).await.unwrap();
    assert_eq!(hops.len(), 3);
    assert_eq!(hops.last().and_then(|h| h.address), Some(other));

    let stale = superseded.await.unwrap().unwrap();
    assert!(stale.len() < 3);

    assert_eq!(discoverer.target().await.map(|t| t.address), Some(other));
    let snapshot = discoverer.snapshot().await;
    assert_eq!(snapshot.len(), 3);
    assert_eq!(snapshot.last().and_then(|h| h.address), Some(other));
    let published = discoverer.subscribe().borrow().clone();
    assert_eq!(published.last().and_then(|h| h.address), Some(other));
}

proptest! {
    #[test]
    fn hop_window_stays_bounded(
        capacity in 1usize..20,
        outcomes in proptest::collection::vec(proptest::option::of(1u64..500), 0..100),
    ) {
        let mut hop = Hop::discovered(1, router(1), 5.0, capacity);
        for outcome in &outcomes {
            let outcome = match outcome {
                Some(ms) => SimulatedPath::reply(router(1), *ms, ReplyKind::EchoReply),
                None => EchoOutcome::Timeout,
            };
            hop.record(&outcome);
        }

        let timeouts = outcomes.iter().filter(|o| o.is_none()).count() as u64;
        prop_assert!(hop.samples().count() <= capacity);
        prop_assert_eq!(hop.sent(), outcomes.len() as u64);
        prop_assert_eq!(hop.timeouts(), timeouts);
        if hop.sent() > 0 {
            let expected = timeouts as f64 / outcomes.len() as f64 * 100.0;
            prop_assert!((hop.loss_percent() - expected).abs() < 1e-9);
        }
        prop_assert!(hop.loss_percent() >= 0.0 && hop.loss_percent() <= 100.0);
    }
}
