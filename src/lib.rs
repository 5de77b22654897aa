//! Argus - network probing and discovery engine
//!
//! Raw ICMP echo probing, traceroute/MTR hop discovery and LAN neighborhood
//! scanning with ARP, reverse DNS, OUI vendor, port and mDNS enrichment.

pub mod config;
pub mod discovery;
pub mod enrich;
pub mod error;
pub mod network;
pub mod trace;
pub mod utils;

// Re-export commonly used types
pub use config::EngineConfig;
pub use discovery::{
    Device, DeviceInspector, DeviceKind, DeviceReport, NeighborhoodScanner, ScanEvent, ScanPhase,
    ScanReport, Subnet,
};
pub use error::{ScanError, ScanResult};
pub use network::{EchoOutcome, EchoReply, IcmpProber, PingStats, ProbeTarget, Prober};
pub use trace::{HopDiscoverer, HopSnapshot};

pub type Result<T> = std::result::Result<T, ScanError>;
