//! Enrichment services: reverse DNS, OUI vendor, TCP port probe and mDNS
//! service discovery

pub mod dns;
pub mod mdns;
pub mod ports;
pub mod vendor;

pub use dns::{reverse_lookup, reverse_lookup_many};
pub use mdns::discover_services;
pub use ports::{probe_ports, OpenPort};
pub use vendor::{parse_mac, VendorDatabase, UNKNOWN_VENDOR};
