//! Hop discovery (traceroute) and continuous per-hop monitoring (MTR)
//!
//! Discovery walks TTL 1..=max_ttl strictly in order and stops at the
//! destination. Monitoring then re-probes every hop that answered once per
//! tick; each hop sits behind its own lock so slow hops never hold up the
//! others.

pub mod geo;
pub mod hop;

pub use geo::{GeoInfo, GeoLocator};
pub use hop::{Hop, HopAddress, HopSnapshot};

use crate::config::TraceConfig;
use crate::enrich::dns;
use crate::network::{ProbeTarget, Prober};
use crate::{Result, ScanError};
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

type SharedHop = Arc<Mutex<Hop>>;

/// Traceroute/MTR session for one destination at a time
pub struct HopDiscoverer<P: Prober + 'static> {
    prober: Arc<P>,
    config: TraceConfig,
    geo: Option<GeoLocator>,
    target: RwLock<Option<ProbeTarget>>,
    hops: Arc<RwLock<Vec<SharedHop>>>,
    discovery: StdMutex<Option<CancellationToken>>,
    monitor: StdMutex<Option<CancellationToken>>,
    updates: Arc<watch::Sender<Vec<HopSnapshot>>>,
}

impl<P: Prober + 'static> HopDiscoverer<P> {
    pub fn new(prober: Arc<P>, config: TraceConfig) -> Self {
        let geo = config
            .geolocate
            .then(|| GeoLocator::new(config.geo_endpoint.clone(), config.geo_timeout_duration()));
        let (updates, _) = watch::channel(Vec::new());

        Self {
            prober,
            config,
            geo,
            target: RwLock::new(None),
            hops: Arc::new(RwLock::new(Vec::new())),
            discovery: StdMutex::new(None),
            monitor: StdMutex::new(None),
            updates: Arc::new(updates),
        }
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Destination of the current session
    pub async fn target(&self) -> Option<ProbeTarget> {
        self.target.read().await.clone()
    }

    /// Walk the path to `target`, replacing any previous session. Returns
    /// the discovered hops in TTL order.
    pub async fn discover(&self, target: &ProbeTarget) -> Result<Vec<HopSnapshot>> {
        let token = self.begin_session();
        let destination = target.address;
        let timeout = self.config.hop_timeout_duration();
        let pace = self.config.pace_duration();
        let mut hops: Vec<Hop> = Vec::new();

        info!("Tracing route to {} ({})", target.display_name(), destination);

        for ttl in 1..=self.config.max_ttl {
            if token.is_cancelled() {
                debug!("Discovery to {} stopped at TTL {}", destination, ttl);
                break;
            }
            if ttl > 1 && !pace.is_zero() {
                tokio::time::sleep(pace).await;
            }

            let outcome = self.prober.probe(destination, Some(ttl), timeout).await;
            let (hop, reached) = match (outcome.reply(), outcome.rtt_millis()) {
                (Some(reply), Some(rtt)) => (
                    Hop::discovered(ttl, reply.responder, rtt, self.config.window),
                    reply.responder == destination,
                ),
                _ => (Hop::placeholder(ttl, self.config.window), false),
            };
            debug!("TTL {}: {:?}", ttl, hop.address());
            hops.push(hop);
            self.publish_local(&token, &hops);

            if reached {
                break;
            }
        }

        self.enrich(&mut hops).await;
        let snapshots: Vec<HopSnapshot> = hops.iter().map(Hop::snapshot).collect();

        // A newer discovery cancels this token before it takes the target lock
        let mut current = self.target.write().await;
        if token.is_cancelled() {
            debug!("Discovery to {} was cancelled, session left untouched", destination);
            return Ok(snapshots);
        }
        *current = Some(target.clone());
        *self.hops.write().await = hops.into_iter().map(|hop| Arc::new(Mutex::new(hop))).collect();
        self.updates.send_replace(snapshots.clone());
        drop(current);

        if snapshots.last().and_then(|h| h.address) != Some(destination) {
            warn!("{} not reached within {} hops", destination, snapshots.len());
        }
        Ok(snapshots)
    }

    /// Cancel whatever runs now and hand out a token for a new discovery
    fn begin_session(&self) -> CancellationToken {
        self.stop();
        let token = CancellationToken::new();
        let mut discovery = self.discovery.lock().unwrap_or_else(|e| e.into_inner());
        *discovery = Some(token.clone());
        token
    }

    fn publish_local(&self, token: &CancellationToken, hops: &[Hop]) {
        if !token.is_cancelled() {
            self.updates.send_replace(hops.iter().map(Hop::snapshot).collect());
        }
    }

    async fn enrich(&self, hops: &mut [Hop]) {
        let addresses: Vec<_> = hops.iter().filter_map(Hop::address).collect();
        if addresses.is_empty() {
            return;
        }

        if self.config.resolve_hostnames {
            let names = dns::reverse_lookup_many(
                addresses.clone(),
                self.config.dns_concurrency,
                self.config.hop_timeout_duration(),
            )
            .await;
            for hop in hops.iter_mut() {
                hop.hostname = hop.address().and_then(|ip| names.get(&ip).cloned());
            }
        }

        if let Some(locator) = &self.geo {
            let located: Vec<_> = stream::iter(addresses)
                .map(|ip| async move { (ip, locator.locate(ip).await) })
                .buffer_unordered(self.config.dns_concurrency.max(1))
                .collect()
                .await;
            for (ip, geo) in located {
                for hop in hops.iter_mut().filter(|h| h.address() == Some(ip)) {
                    hop.geo = geo.clone();
                }
            }
        }
    }

    /// Start re-probing every responding hop once per tick. A no-op while
    /// monitoring is already running.
    pub async fn start_monitoring(&self) -> Result<()> {
        let hops: Vec<SharedHop> = self.hops.read().await.clone();
        if hops.is_empty() {
            return Err(ScanError::InvalidTarget(
                "no hops to monitor, run discovery first".to_string(),
            ));
        }

        let token = {
            let mut monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
            match monitor.as_ref() {
                Some(active) if !active.is_cancelled() => return Ok(()),
                _ => {
                    let token = CancellationToken::new();
                    *monitor = Some(token.clone());
                    token
                }
            }
        };

        let prober = self.prober.clone();
        let updates = self.updates.clone();
        let interval = self.config.interval_duration();
        let timeout = self.config.monitor_timeout_duration();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::spawn(run_tick(
                            prober.clone(),
                            hops.clone(),
                            updates.clone(),
                            timeout,
                        ));
                    }
                }
            }
            debug!("Hop monitoring stopped");
        });

        info!("Monitoring started with a {:?} interval", interval);
        Ok(())
    }

    /// Stop discovery or monitoring. Statistics stay readable until the next
    /// discovery replaces them.
    pub fn stop(&self) {
        for slot in [&self.discovery, &self.monitor] {
            let slot = slot.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(token) = slot.as_ref() {
                token.cancel();
            }
        }
    }

    pub fn is_monitoring(&self) -> bool {
        let monitor = self.monitor.lock().unwrap_or_else(|e| e.into_inner());
        monitor.as_ref().map_or(false, |t| !t.is_cancelled())
    }

    /// Current state of every hop, in TTL order
    pub async fn snapshot(&self) -> Vec<HopSnapshot> {
        let hops = self.hops.read().await.clone();
        collect_snapshots(&hops).await
    }

    /// Receive a fresh snapshot after every discovery step and monitoring tick
    pub fn subscribe(&self) -> watch::Receiver<Vec<HopSnapshot>> {
        self.updates.subscribe()
    }
}

/// One monitoring tick: every responding hop probed concurrently, each
/// result applied under that hop's own lock
async fn run_tick<P: Prober + 'static>(
    prober: Arc<P>,
    hops: Vec<SharedHop>,
    updates: Arc<watch::Sender<Vec<HopSnapshot>>>,
    timeout: std::time::Duration,
) {
    let mut probes = Vec::with_capacity(hops.len());
    for hop in &hops {
        // placeholders have nothing to probe
        let Some(ip) = hop.lock().await.address() else {
            continue;
        };
        let prober = prober.clone();
        let hop = hop.clone();
        probes.push(tokio::spawn(async move {
            let outcome = prober.probe(ip, None, timeout).await;
            hop.lock().await.record(&outcome);
        }));
    }
    futures::future::join_all(probes).await;

    updates.send_replace(collect_snapshots(&hops).await);
}

async fn collect_snapshots(hops: &[SharedHop]) -> Vec<HopSnapshot> {
    let mut snapshots = Vec::with_capacity(hops.len());
    for hop in hops {
        snapshots.push(hop.lock().await.snapshot());
    }
    snapshots
}
