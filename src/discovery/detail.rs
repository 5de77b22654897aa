//! On-demand deep probe of a single device

use super::arp::{NeighborTable, SystemNeighborTable};
use crate::config::DetailConfig;
use crate::enrich::{dns, mdns, ports, OpenPort, VendorDatabase};
use crate::network::{ping_host, PingStats, Prober};
use crate::Result;
use chrono::{DateTime, Utc};
use log::{debug, info};
use pnet::util::MacAddr;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Best guess at what a device is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Router,
    Printer,
    Computer,
    Phone,
    MediaDevice,
    Nas,
    Camera,
    IoT,
    Unknown,
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeviceKind::Router => "Router",
            DeviceKind::Printer => "Printer",
            DeviceKind::Computer => "Computer",
            DeviceKind::Phone => "Phone",
            DeviceKind::MediaDevice => "Media device",
            DeviceKind::Nas => "NAS",
            DeviceKind::Camera => "Camera",
            DeviceKind::IoT => "IoT device",
            DeviceKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

const PRINTER_VENDORS: &[&str] = &["Epson", "Brother", "Canon", "Kyocera", "Xerox", "Lexmark"];
const CAMERA_VENDORS: &[&str] = &["Hikvision", "Dahua", "Axis"];
const NAS_VENDORS: &[&str] = &["Synology", "QNAP", "Western Digital"];
const MEDIA_VENDORS: &[&str] = &["Sonos", "Roku", "Sony", "LG Electronics", "Nintendo"];
const ROUTER_VENDORS: &[&str] = &[
    "Cisco", "Netgear", "TP-Link", "Ubiquiti", "MikroTik", "D-Link", "Arris", "ASUSTek", "Huawei",
    "Fortinet", "PC Engines",
];
const IOT_VENDORS: &[&str] = &[
    "Espressif", "Philips Lighting", "LIFX", "Nest", "Amazon", "Xiaomi", "Belkin", "Raspberry Pi",
];
const COMPUTER_VENDORS: &[&str] = &[
    "Dell", "Intel", "Hewlett Packard", "VMware", "VirtualBox", "QEMU", "Parallels", "Microsoft",
    "Realtek",
];

fn vendor_is(vendor: &str, names: &[&str]) -> bool {
    let vendor = vendor.to_ascii_lowercase();
    names.iter().any(|name| vendor.contains(&name.to_ascii_lowercase()))
}

/// Classify from vendor name, open ports and advertised services. The most
/// specific evidence is checked first.
pub fn classify(
    vendor: Option<&str>,
    open_ports: &[u16],
    services: &BTreeSet<String>,
) -> DeviceKind {
    let vendor = vendor.unwrap_or("");
    let port = |p: u16| open_ports.contains(&p);
    let service = |s: &str| services.contains(s);

    if service("IPP Printer")
        || service("LPD Printer")
        || service("Printer")
        || port(9100)
        || port(515)
        || (port(631) && !port(22))
        || vendor_is(vendor, PRINTER_VENDORS)
    {
        return DeviceKind::Printer;
    }
    if port(554) || vendor_is(vendor, CAMERA_VENDORS) {
        return DeviceKind::Camera;
    }
    if vendor_is(vendor, NAS_VENDORS) || ((service("SMB") || service("AFP")) && port(5000)) {
        return DeviceKind::Nas;
    }
    if service("Chromecast")
        || service("AirPlay")
        || service("AirPlay Audio")
        || service("Sonos")
        || service("Spotify Connect")
        || port(8008)
        || port(8009)
        || port(32400)
        || vendor_is(vendor, MEDIA_VENDORS)
    {
        return DeviceKind::MediaDevice;
    }
    if (port(53) && (port(80) || port(443))) || vendor_is(vendor, ROUTER_VENDORS) {
        return DeviceKind::Router;
    }
    if port(62078) || (service("Apple Device") && !service("Workstation")) {
        return DeviceKind::Phone;
    }
    if service("HomeKit")
        || service("Matter")
        || service("MQTT")
        || port(1883)
        || vendor_is(vendor, IOT_VENDORS)
    {
        return DeviceKind::IoT;
    }
    if port(22)
        || port(3389)
        || port(445)
        || port(139)
        || service("Workstation")
        || service("SSH")
        || service("Screen Sharing")
        || vendor_is(vendor, COMPUTER_VENDORS)
    {
        return DeviceKind::Computer;
    }
    DeviceKind::Unknown
}

/// Everything the deep probe learned about one address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceReport {
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    pub mac: Option<MacAddr>,
    pub vendor: Option<String>,
    pub ping: PingStats,
    pub open_ports: Vec<OpenPort>,
    pub services: BTreeSet<String>,
    pub kind: DeviceKind,
    pub inspected_at: DateTime<Utc>,
}

pub struct DeviceInspector<P: Prober + 'static, N: NeighborTable = SystemNeighborTable> {
    prober: Arc<P>,
    neighbors: N,
    config: DetailConfig,
    vendors: VendorDatabase,
}

impl<P: Prober + 'static> DeviceInspector<P, SystemNeighborTable> {
    pub fn new(prober: Arc<P>, config: DetailConfig) -> Self {
        Self::with_neighbor_table(prober, SystemNeighborTable, config)
    }
}

impl<P: Prober + 'static, N: NeighborTable> DeviceInspector<P, N> {
    pub fn with_neighbor_table(prober: Arc<P>, neighbors: N, config: DetailConfig) -> Self {
        Self {
            prober,
            neighbors,
            config,
            vendors: VendorDatabase::builtin(),
        }
    }

    pub fn with_vendors(mut self, vendors: VendorDatabase) -> Self {
        self.vendors = vendors;
        self
    }

    /// Ping, port probe, name and service lookups run side by side; the
    /// MAC is looked up once they finish
    pub async fn inspect(&self, ip: Ipv4Addr) -> Result<DeviceReport> {
        info!("Inspecting {}", ip);
        let config = &self.config;

        let ping = ping_host(
            self.prober.as_ref(),
            ip,
            config.ping_count,
            config.ping_interval_duration(),
            config.ping_timeout_duration(),
        );
        let open_ports = ports::probe_ports(
            ip,
            &config.ports,
            config.port_timeout_duration(),
            config.port_concurrency,
        );
        let hostname = dns::reverse_lookup(ip, config.dns_timeout_duration());
        let services = async {
            mdns::services_for(ip, config.service_window_duration())
                .await
                .unwrap_or_else(|e| {
                    debug!("No service discovery for {}: {}", ip, e);
                    BTreeSet::new()
                })
        };

        let (ping, open_ports, hostname, services) =
            tokio::join!(ping, open_ports, hostname, services);

        // Read after the pings so the kernel has resolved the address
        let mac = match self.neighbors.read().await {
            Ok(table) => table.get(&ip).copied(),
            Err(e) => {
                debug!("Cannot read neighbor table: {}", e);
                None
            }
        };
        let vendor = mac.map(|mac| self.vendors.lookup(&mac));
        let port_numbers: Vec<u16> = open_ports.iter().map(|p| p.port).collect();
        let kind = classify(vendor.as_deref(), &port_numbers, &services);

        Ok(DeviceReport {
            ip,
            hostname,
            mac,
            vendor,
            ping,
            open_ports,
            services,
            kind,
            inspected_at: Utc::now(),
        })
    }
}
