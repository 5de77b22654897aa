//! Neighborhood scan orchestrator
//!
//! Phases run in order: Priming, Sweeping, Reconciling, Enriching. Work
//! inside a phase is concurrent; the device table is only written here, as
//! worker results arrive.

use super::arp::{self, NeighborTable, SystemNeighborTable};
use super::subnet::{self, Subnet};
use super::sweep::{ping_sweep, SweepOptions, SweepOutcome, SweepResult};
use super::{Device, DeviceTable};
use crate::config::ScanConfig;
use crate::enrich::{dns, mdns, VendorDatabase};
use crate::network::Prober;
use crate::{Result, ScanError};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScanPhase {
    Idle,
    Priming,
    Sweeping,
    Reconciling,
    Enriching,
    Done,
    Stopped,
}

impl std::fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ScanPhase::Idle => "idle",
            ScanPhase::Priming => "priming ARP cache",
            ScanPhase::Sweeping => "ping sweep",
            ScanPhase::Reconciling => "reading neighbor table",
            ScanPhase::Enriching => "resolving names and services",
            ScanPhase::Done => "done",
            ScanPhase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Progress notifications for subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScanEvent {
    Started { subnet: Subnet, candidates: usize },
    Phase(ScanPhase),
    Progress { probed: usize, total: usize, found: usize },
    DeviceFound(Device),
}

/// Outcome of a completed or stopped scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub subnet: Subnet,
    pub devices: Vec<Device>,
    pub candidates: usize,
    pub probed: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Time spent per phase, in milliseconds
    pub phase_ms: BTreeMap<ScanPhase, u64>,
    pub stopped: bool,
}

/// Scans the local subnet; one scan at a time per scanner
pub struct NeighborhoodScanner<P: Prober + 'static, N: NeighborTable = SystemNeighborTable> {
    prober: Arc<P>,
    neighbors: N,
    config: ScanConfig,
    vendors: VendorDatabase,
    events: broadcast::Sender<ScanEvent>,
    cancel: StdMutex<CancellationToken>,
    phase: StdMutex<ScanPhase>,
    running: AtomicBool,
}

impl<P: Prober + 'static> NeighborhoodScanner<P, SystemNeighborTable> {
    pub fn new(prober: Arc<P>, config: ScanConfig) -> Self {
        Self::with_neighbor_table(prober, SystemNeighborTable, config)
    }
}

/// Resets the running flag however a scan ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Scan bookkeeping owned by the scanning task
struct Session {
    table: DeviceTable,
    phase_ms: BTreeMap<ScanPhase, u64>,
    probed: usize,
}

impl<P: Prober + 'static, N: NeighborTable> NeighborhoodScanner<P, N> {
    pub fn with_neighbor_table(prober: Arc<P>, neighbors: N, config: ScanConfig) -> Self {
        let vendors = VendorDatabase::load(config.oui_file.as_deref());
        let (events, _) = broadcast::channel(256);

        Self {
            prober,
            neighbors,
            config,
            vendors,
            events,
            cancel: StdMutex::new(CancellationToken::new()),
            phase: StdMutex::new(ScanPhase::Idle),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self) -> ScanPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask the running scan to wind down: no new probes start and the
    /// remaining phases are skipped
    pub fn stop(&self) {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).cancel();
    }

    /// Detect the local subnet and scan it
    pub async fn scan(&self) -> Result<ScanReport> {
        let subnet = subnet::detect(self.config.interface.as_deref())?;
        self.scan_subnet(subnet).await
    }

    pub async fn scan_subnet(&self, subnet: Subnet) -> Result<ScanReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ScanError::ScanInProgress);
        }
        let _running = RunningGuard(&self.running);

        let hosts = subnet.candidates(self.config.max_hosts)?;
        let cancel = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = cancel.clone();

        let started_at = Utc::now();
        let start = Instant::now();
        let mut session = Session {
            table: DeviceTable::new(),
            phase_ms: BTreeMap::new(),
            probed: 0,
        };

        info!("Scanning {} ({} candidates)", subnet, hosts.len());
        self.emit(ScanEvent::Started {
            subnet,
            candidates: hosts.len(),
        });

        let finished = self.run_phases(&subnet, &hosts, &cancel, &mut session).await;
        let final_phase = if finished { ScanPhase::Done } else { ScanPhase::Stopped };
        self.set_phase(final_phase);

        let devices = session.table.into_devices();
        info!(
            "Scan of {} {} with {} devices",
            subnet,
            if finished { "finished" } else { "stopped" },
            devices.len()
        );

        Ok(ScanReport {
            subnet,
            devices,
            candidates: hosts.len(),
            probed: session.probed,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            phase_ms: session.phase_ms,
            stopped: !finished,
        })
    }

    /// Returns false when the scan was stopped before Enriching completed
    async fn run_phases(
        &self,
        subnet: &Subnet,
        hosts: &[Ipv4Addr],
        cancel: &CancellationToken,
        session: &mut Session,
    ) -> bool {
        let phases = [
            ScanPhase::Priming,
            ScanPhase::Sweeping,
            ScanPhase::Reconciling,
            ScanPhase::Enriching,
        ];

        for phase in phases {
            if cancel.is_cancelled() {
                return false;
            }
            self.set_phase(phase);
            let phase_start = Instant::now();

            match phase {
                ScanPhase::Priming => self.prime(subnet, hosts, cancel, session).await,
                ScanPhase::Sweeping => self.sweep(hosts, cancel, session).await,
                ScanPhase::Reconciling => self.reconcile(subnet, session).await,
                ScanPhase::Enriching => self.enrich(subnet, cancel, session).await,
                _ => {}
            }
            session
                .phase_ms
                .insert(phase, phase_start.elapsed().as_millis() as u64);
        }

        !cancel.is_cancelled()
    }

    async fn prime(
        &self,
        subnet: &Subnet,
        hosts: &[Ipv4Addr],
        cancel: &CancellationToken,
        session: &mut Session,
    ) {
        arp::prime(
            hosts,
            self.config.prime_port,
            self.config.prime_concurrency,
            self.config.permit_wait_duration(),
            cancel,
        )
        .await;

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(self.config.settle_duration()) => {}
        }
        self.apply_neighbors(subnet, session).await;
    }

    async fn sweep(&self, hosts: &[Ipv4Addr], cancel: &CancellationToken, session: &mut Session) {
        let (tx, mut rx) = mpsc::channel::<SweepResult>(self.config.sweep_concurrency.max(1) * 2);
        let options = SweepOptions::from(&self.config);
        let total = hosts.len();

        let workers = ping_sweep(self.prober.clone(), hosts, options, cancel, tx);
        let collector = async {
            while let Some(result) = rx.recv().await {
                session.probed += 1;
                if let SweepOutcome::Alive { latency_ms } = result.outcome {
                    let device = Device::new(result.ip).with_latency(latency_ms);
                    if session.table.apply(device.clone()) {
                        self.emit(ScanEvent::DeviceFound(device));
                    }
                }
                self.emit(ScanEvent::Progress {
                    probed: session.probed,
                    total,
                    found: session.table.len(),
                });
            }
        };
        tokio::join!(workers, collector);

        debug!("Sweep probed {} of {} addresses", session.probed, total);
    }

    async fn reconcile(&self, subnet: &Subnet, session: &mut Session) {
        self.apply_neighbors(subnet, session).await;
    }

    /// Merge neighbor table entries on our subnet into the device table
    async fn apply_neighbors(&self, subnet: &Subnet, session: &mut Session) {
        let neighbors = match self.neighbors.read().await {
            Ok(neighbors) => neighbors,
            Err(e) => {
                warn!("Cannot read neighbor table: {}", e);
                return;
            }
        };

        for (ip, mac) in neighbors {
            if !subnet.contains(ip)
                || ip == subnet.address
                || ip == subnet.network
                || ip == subnet.broadcast
            {
                continue;
            }
            let vendor = self.vendors.lookup(&mac);
            let device = Device::new(ip).with_mac(mac, vendor);
            if session.table.apply(device.clone()) {
                self.emit(ScanEvent::DeviceFound(device));
            }
        }
    }

    async fn enrich(
        &self,
        subnet: &Subnet,
        cancel: &CancellationToken,
        session: &mut Session,
    ) {
        let addresses = session.table.addresses();

        let names = async {
            if self.config.resolve_hostnames {
                dns::reverse_lookup_many(
                    addresses.clone(),
                    self.config.dns_concurrency,
                    self.config.dns_timeout_duration(),
                )
                .await
            } else {
                HashMap::new()
            }
        };
        let services = async {
            mdns::discover_services(self.config.service_window_duration(), cancel)
                .await
                .unwrap_or_else(|e| {
                    warn!("Service discovery unavailable: {}", e);
                    HashMap::new()
                })
        };
        let (names, services): (HashMap<Ipv4Addr, String>, HashMap<Ipv4Addr, BTreeSet<String>>) =
            tokio::select! {
                _ = cancel.cancelled() => return,
                found = async { tokio::join!(names, services) } => found,
            };

        for (ip, name) in names {
            session.table.apply(Device::new(ip).with_hostname(name));
        }
        for (ip, labels) in services {
            if subnet.contains(ip) && ip != subnet.address {
                session.table.apply(Device::new(ip).with_services(labels));
            }
        }
    }

    fn set_phase(&self, phase: ScanPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
        debug!("Scan phase: {}", phase);
        self.emit(ScanEvent::Phase(phase));
    }

    fn emit(&self, event: ScanEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}
