//! LAN neighborhood discovery
//!
//! A scan enumerates the local subnet, primes the ARP cache, ping-sweeps
//! every candidate, reconciles with the neighbor table and finally enriches
//! what it found. Workers never touch the device table; they send results to
//! the scanner, which applies them one at a time.

pub mod arp;
pub mod detail;
pub mod engine;
pub mod subnet;
pub mod sweep;

use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

pub use arp::{NeighborMap, NeighborTable, StaticNeighborTable, SystemNeighborTable};
pub use detail::{DeviceInspector, DeviceKind, DeviceReport};
pub use engine::{NeighborhoodScanner, ScanEvent, ScanPhase, ScanReport};
pub use subnet::Subnet;
pub use sweep::{ping_sweep, SweepOptions, SweepOutcome, SweepResult};

/// A host seen on the local network, keyed by its IPv4 address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    /// Echo round trip from the sweep, if the host answered
    pub latency_ms: Option<f64>,
    pub mac: Option<MacAddr>,
    pub vendor: Option<String>,
    pub services: BTreeSet<String>,
}

impl Device {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self {
            ip,
            hostname: None,
            latency_ms: None,
            mac: None,
            vendor: None,
            services: BTreeSet::new(),
        }
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    pub fn with_mac(mut self, mac: MacAddr, vendor: impl Into<String>) -> Self {
        self.mac = Some(mac);
        self.vendor = Some(vendor.into());
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services.extend(services.into_iter().map(Into::into));
        self
    }

    /// Fold a later observation of the same host into this one. Known
    /// fields are replaced, unknown ones never clear, services accumulate.
    pub fn merge(&mut self, other: Device) {
        debug_assert_eq!(self.ip, other.ip);
        if other.hostname.is_some() {
            self.hostname = other.hostname;
        }
        if other.latency_ms.is_some() {
            self.latency_ms = other.latency_ms;
        }
        if other.mac.is_some() {
            self.mac = other.mac;
        }
        if other.vendor.is_some() {
            self.vendor = other.vendor;
        }
        self.services.extend(other.services);
    }
}

/// Devices of one scan, ordered by address
#[derive(Debug, Clone, Default)]
pub struct DeviceTable {
    devices: BTreeMap<Ipv4Addr, Device>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an observation; returns true when the address is new
    pub fn apply(&mut self, device: Device) -> bool {
        match self.devices.get_mut(&device.ip) {
            Some(existing) => {
                existing.merge(device);
                false
            }
            None => {
                self.devices.insert(device.ip, device);
                true
            }
        }
    }

    pub fn get(&self, ip: &Ipv4Addr) -> Option<&Device> {
        self.devices.get(ip)
    }

    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.devices.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn into_devices(self) -> Vec<Device> {
        self.devices.into_values().collect()
    }
}
