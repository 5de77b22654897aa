//! Local subnet detection and candidate host enumeration

use crate::config::MAX_SCAN_HOSTS;
use crate::{Result, ScanError};
use ipnetwork::Ipv4Network;
use log::debug;
use pnet::datalink;
use pnet::ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// IPv4 subnet the scanning host sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    /// Our own address on this subnet
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub network: Ipv4Addr,
    pub broadcast: Ipv4Addr,
    pub prefix: u8,
}

impl Subnet {
    /// Build from an address and a dotted netmask. The mask must be
    /// contiguous.
    pub fn new(address: Ipv4Addr, netmask: Ipv4Addr) -> Result<Self> {
        let mask = u32::from(netmask);
        if mask.leading_ones() + mask.trailing_zeros() != 32 {
            return Err(ScanError::InvalidTarget(format!(
                "netmask {} is not contiguous",
                netmask
            )));
        }
        let ip = u32::from(address);

        Ok(Self {
            address,
            netmask,
            network: Ipv4Addr::from(ip & mask),
            broadcast: Ipv4Addr::from(ip | !mask),
            prefix: mask.leading_ones() as u8,
        })
    }

    pub fn from_prefix(address: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(ScanError::InvalidTarget(format!("prefix /{} out of range", prefix)));
        }
        let mask = u32::MAX.checked_shl(32 - prefix as u32).unwrap_or(0);
        Self::new(address, Ipv4Addr::from(mask))
    }

    /// Parse `a.b.c.d/nn`. The address part is taken as our own address.
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        let network: Ipv4Network = cidr
            .parse()
            .map_err(|e| ScanError::InvalidTarget(format!("{}: {}", cidr, e)))?;
        Self::from_prefix(network.ip(), network.prefix())
    }

    /// Addresses strictly between network and broadcast
    pub fn host_count(&self) -> u64 {
        let span = u32::from(self.broadcast) as u64 - u32::from(self.network) as u64;
        span.saturating_sub(1)
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & u32::from(self.netmask) == u32::from(self.network)
    }

    /// Candidate addresses: everything strictly between network and
    /// broadcast except our own address. Empty when the subnet holds more
    /// than `cap` hosts.
    pub fn hosts_capped(&self, cap: u64) -> Vec<Ipv4Addr> {
        if self.host_count() > cap {
            return Vec::new();
        }
        let Some(start) = u32::from(self.network).checked_add(1) else {
            return Vec::new();
        };
        let end = u32::from(self.broadcast);

        (start..end)
            .map(Ipv4Addr::from)
            .filter(|ip| *ip != self.address)
            .collect()
    }

    /// Candidates under the default /22 cap
    pub fn hosts(&self) -> Vec<Ipv4Addr> {
        self.hosts_capped(MAX_SCAN_HOSTS)
    }

    /// Like [`hosts_capped`](Self::hosts_capped), but an oversized or empty
    /// subnet is an error the scanner can report
    pub fn candidates(&self, cap: u64) -> Result<Vec<Ipv4Addr>> {
        let count = self.host_count();
        if count > cap {
            return Err(ScanError::CapacityExceeded { hosts: count, cap });
        }
        let hosts = self.hosts_capped(cap);
        if hosts.is_empty() {
            return Err(ScanError::NoCandidates);
        }
        Ok(hosts)
    }
}

impl std::fmt::Display for Subnet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

/// Subnet of the named interface, or of the first interface that is up,
/// not loopback and has an IPv4 address
pub fn detect(interface: Option<&str>) -> Result<Subnet> {
    let interfaces = datalink::interfaces();

    let chosen = interfaces
        .iter()
        .filter(|iface| match interface {
            Some(name) => iface.name == name,
            None => iface.is_up() && !iface.is_loopback(),
        })
        .find_map(|iface| {
            iface.ips.iter().find_map(|ip| match ip {
                IpNetwork::V4(v4) if !v4.ip().is_loopback() => Some((iface.name.clone(), *v4)),
                _ => None,
            })
        });

    let (name, network) = chosen.ok_or_else(|| {
        ScanError::SubnetUnavailable(match interface {
            Some(name) => format!("interface {} has no IPv4 address", name),
            None => "no active interface with an IPv4 address".to_string(),
        })
    })?;

    let subnet = Subnet::new(network.ip(), network.mask())?;
    debug!("Using {} on {} ({} hosts)", subnet, name, subnet.host_count());
    Ok(subnet)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masking() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let subnet = Subnet::new(Ipv4Addr::new(192, 168, 1, 10), mask).unwrap();
        assert_eq!(subnet.network, Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(subnet.broadcast, Ipv4Addr::new(192, 168, 1, 255));
        assert_eq!(subnet.prefix, 24);
        assert_eq!(subnet.host_count(), 254);
        assert_eq!(subnet.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn test_hosts_exclude_network_broadcast_and_self() {
        let mask = Ipv4Addr::new(255, 255, 255, 0);
        let subnet = Subnet::new(Ipv4Addr::new(192, 168, 1, 10), mask).unwrap();
        let hosts = subnet.hosts();
        assert_eq!(hosts.len(), 253);
        assert_eq!(hosts.first(), Some(&Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(192, 168, 1, 254)));
        assert!(!hosts.contains(&Ipv4Addr::new(192, 168, 1, 10)));
    }

    #[test]
    fn test_oversized_subnet_is_empty() {
        let subnet = Subnet::from_cidr("10.1.2.3/16").unwrap();
        assert!(subnet.hosts().is_empty());
        assert!(matches!(
            subnet.candidates(MAX_SCAN_HOSTS),
            Err(ScanError::CapacityExceeded { hosts: 65534, cap: 1022 })
        ));

        let slash22 = Subnet::from_cidr("10.1.2.3/22").unwrap();
        assert_eq!(slash22.hosts().len(), 1021);
    }

    #[test]
    fn test_tiny_subnets() {
        let point_to_point = Subnet::from_cidr("10.0.0.1/31").unwrap();
        assert_eq!(point_to_point.host_count(), 0);
        assert!(matches!(
            point_to_point.candidates(MAX_SCAN_HOSTS),
            Err(ScanError::NoCandidates)
        ));

        let single = Subnet::from_cidr("10.0.0.1/32").unwrap();
        assert!(single.hosts().is_empty());
    }

    #[test]
    fn test_top_of_address_space() {
        let last = Subnet::from_cidr("255.255.255.255/32").unwrap();
        assert!(last.hosts().is_empty());
        assert!(matches!(
            last.candidates(MAX_SCAN_HOSTS),
            Err(ScanError::NoCandidates)
        ));

        let top = Subnet::from_cidr("255.255.255.250/30").unwrap();
        assert_eq!(top.hosts(), vec![Ipv4Addr::new(255, 255, 255, 249)]);
    }

    #[test]
    fn test_rejects_bad_masks() {
        assert!(Subnet::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(255, 0, 255, 0)).is_err());
        assert!(Subnet::from_cidr("10.0.0.1/40").is_err());
        assert!(Subnet::from_cidr("not-a-net").is_err());
    }

    #[test]
    fn test_contains() {
        let subnet = Subnet::from_cidr("172.16.4.20/22").unwrap();
        assert!(subnet.contains(Ipv4Addr::new(172, 16, 7, 1)));
        assert!(!subnet.contains(Ipv4Addr::new(172, 16, 8, 1)));
    }
}
