//! ARP cache priming and neighbor table reading
//!
//! Hosts that ignore ICMP still answer ARP. Sending any datagram to them
//! makes the kernel resolve their MAC, which then shows up in the neighbor
//! table even though the datagram itself is ignored.

use crate::enrich::vendor::parse_mac;
use crate::utils::acquire_permit;
use crate::Result;
use async_trait::async_trait;
use log::{debug, trace};
use once_cell::sync::Lazy;
use pnet::util::MacAddr;
use regex::Regex;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Address to MAC map for resolved neighbors
pub type NeighborMap = HashMap<Ipv4Addr, MacAddr>;

/// Send one empty UDP datagram to each host, at most `concurrency` sends in
/// flight. Failures are ignored. Returns how many sends were issued.
pub async fn prime(
    hosts: &[Ipv4Addr],
    port: u16,
    concurrency: usize,
    wait: Duration,
    cancel: &CancellationToken,
) -> usize {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    prime_with_pool(hosts, port, &semaphore, wait, cancel).await
}

/// Like [`prime`], drawing permits from a shared pool. A host that cannot get
/// a permit within `wait` is skipped.
pub async fn prime_with_pool(
    hosts: &[Ipv4Addr],
    port: u16,
    semaphore: &Arc<Semaphore>,
    wait: Duration,
    cancel: &CancellationToken,
) -> usize {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            debug!("ARP priming skipped, cannot bind UDP socket: {}", e);
            return 0;
        }
    };

    let mut set = JoinSet::new();
    let mut issued = 0;

    for &host in hosts {
        if cancel.is_cancelled() {
            break;
        }
        let Some(permit) = acquire_permit(semaphore, wait).await else {
            trace!("No priming slot for {} within {:?}", host, wait);
            continue;
        };
        let socket = socket.clone();
        issued += 1;

        set.spawn(async move {
            let _permit = permit;
            if let Err(e) = socket.send_to(&[], SocketAddr::from((host, port))).await {
                trace!("Priming {} failed: {}", host, e);
            }
        });
    }

    while set.join_next().await.is_some() {}
    debug!("Primed {} of {} addresses on UDP port {}", issued, hosts.len(), port);
    issued
}

/// Source of address to MAC mappings
#[async_trait]
pub trait NeighborTable: Send + Sync {
    async fn read(&self) -> Result<NeighborMap>;
}

/// Fixed table, for tests and offline runs
#[derive(Debug, Clone, Default)]
pub struct StaticNeighborTable {
    entries: NeighborMap,
}

impl StaticNeighborTable {
    pub fn new(entries: NeighborMap) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl NeighborTable for StaticNeighborTable {
    async fn read(&self) -> Result<NeighborMap> {
        Ok(self.entries.clone())
    }
}

/// The operating system's IPv4 neighbor table
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemNeighborTable;

#[async_trait]
impl NeighborTable for SystemNeighborTable {
    #[cfg(target_os = "linux")]
    async fn read(&self) -> Result<NeighborMap> {
        let content = tokio::fs::read_to_string("/proc/net/arp").await?;
        Ok(parse_proc_net_arp(&content))
    }

    #[cfg(not(target_os = "linux"))]
    async fn read(&self) -> Result<NeighborMap> {
        let output = tokio::process::Command::new("arp")
            .arg("-an")
            .output()
            .await
            .map_err(|e| crate::ScanError::NetworkError(format!("arp command failed: {}", e)))?;
        Ok(parse_arp_an(&String::from_utf8_lossy(&output.stdout)))
    }
}

fn usable(mac: &MacAddr) -> bool {
    *mac != MacAddr::zero() && *mac != MacAddr::broadcast()
}

/// Parse Linux `/proc/net/arp`:
///
/// ```text
/// IP address       HW type     Flags       HW address            Mask     Device
/// 192.168.1.1      0x1         0x2         a4:2b:b0:12:34:56     *        wlan0
/// ```
pub fn parse_proc_net_arp(content: &str) -> NeighborMap {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            let ip = fields[0].parse::<Ipv4Addr>().ok()?;
            let mac = parse_mac(fields[3])?;
            usable(&mac).then_some((ip, mac))
        })
        .collect()
}

static ARP_AN_LINE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(concat!(
        r"\((\d{1,3}(?:\.\d{1,3}){3})\) at ",
        r"([0-9A-Fa-f]{1,2}(?:[:-][0-9A-Fa-f]{1,2}){5})",
    ))
    .ok()
});

/// Parse BSD/macOS `arp -an`:
///
/// ```text
/// ? (192.168.1.1) at a4:2b:b0:12:34:56 on en0 ifscope [ethernet]
/// ? (192.168.1.7) at (incomplete) on en0 ifscope [ethernet]
/// ```
pub fn parse_arp_an(content: &str) -> NeighborMap {
    let Some(pattern) = ARP_AN_LINE.as_ref() else {
        return NeighborMap::new();
    };

    content
        .lines()
        .filter_map(|line| {
            let caps = pattern.captures(line)?;
            let ip = caps.get(1)?.as_str().parse::<Ipv4Addr>().ok()?;
            let mac = parse_mac(caps.get(2)?.as_str())?;
            usable(&mac).then_some((ip, mac))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_NET_ARP: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
192.168.1.1      0x1         0x2         a4:2b:b0:12:34:56     *        wlan0
192.168.1.23     0x1         0x0         00:00:00:00:00:00     *        wlan0
192.168.1.40     0x1         0x2         b8:27:eb:aa:bb:cc     *        wlan0
192.168.1.255    0x1         0x2         ff:ff:ff:ff:ff:ff     *        wlan0
";

    const ARP_AN: &str = "\
? (192.168.1.1) at a4:2b:b0:12:34:56 on en0 ifscope [ethernet]
? (192.168.1.7) at (incomplete) on en0 ifscope [ethernet]
router.lan (192.168.1.9) at 0:1c:b3:9:a:ff on en0 ifscope permanent [ethernet]
? (224.0.0.251) at 1:0:5e:0:0:fb on en0 ifscope permanent [ethernet]
? (192.168.1.255) at ff:ff:ff:ff:ff:ff on en0 ifscope [ethernet]
";

    #[test]
    fn test_proc_net_arp() {
        let table = parse_proc_net_arp(PROC_NET_ARP);
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get(&Ipv4Addr::new(192, 168, 1, 40)),
            Some(&MacAddr::new(0xb8, 0x27, 0xeb, 0xaa, 0xbb, 0xcc))
        );
        assert!(!table.contains_key(&Ipv4Addr::new(192, 168, 1, 23)));
    }

    #[test]
    fn test_arp_an() {
        let table = parse_arp_an(ARP_AN);
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.get(&Ipv4Addr::new(192, 168, 1, 9)),
            Some(&MacAddr::new(0x00, 0x1c, 0xb3, 0x09, 0x0a, 0xff))
        );
        assert!(!table.contains_key(&Ipv4Addr::new(192, 168, 1, 7)));
        assert!(!table.contains_key(&Ipv4Addr::new(192, 168, 1, 255)));
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_proc_net_arp("").is_empty());
        assert!(parse_arp_an("no entries").is_empty());
    }

    #[test]
    fn test_static_table() {
        let entries = parse_proc_net_arp(PROC_NET_ARP);
        let table = StaticNeighborTable::new(entries.clone());
        let read = tokio_test::block_on(table.read()).unwrap();
        assert_eq!(read, entries);
    }

    const WAIT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn test_prime_loopback() {
        let hosts = [Ipv4Addr::LOCALHOST; 5];
        let issued = prime(&hosts, 33434, 2, WAIT, &CancellationToken::new()).await;
        assert_eq!(issued, 5);
    }

    #[tokio::test]
    async fn test_prime_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let issued = prime(&[Ipv4Addr::LOCALHOST], 33434, 2, WAIT, &cancel).await;
        assert_eq!(issued, 0);
    }

    #[tokio::test]
    async fn test_saturated_pool_skips_hosts() {
        let semaphore = Arc::new(Semaphore::new(1));
        let _held = semaphore.clone().acquire_owned().await.unwrap();
        let hosts = [Ipv4Addr::LOCALHOST; 3];

        let started = std::time::Instant::now();
        let issued = tokio::time::timeout(
            Duration::from_secs(5),
            prime_with_pool(
                &hosts,
                33434,
                &semaphore,
                Duration::from_millis(20),
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("priming must not block on a saturated pool");

        assert_eq!(issued, 0);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
