//! TCP connect port probe for the device detail scan

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// An open port and what usually listens there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPort {
    pub port: u16,
    pub label: String,
    pub connect_ms: u64,
}

/// Conventional service name for a port
pub fn port_label(port: u16) -> &'static str {
    match port {
        21 => "FTP",
        22 => "SSH",
        23 => "Telnet",
        53 => "DNS",
        80 => "HTTP",
        139 => "NetBIOS",
        443 => "HTTPS",
        445 => "SMB",
        515 => "LPD",
        548 => "AFP",
        554 => "RTSP",
        631 => "IPP",
        1883 => "MQTT",
        3389 => "RDP",
        5000 => "UPnP/Synology",
        5353 => "mDNS",
        8008 | 8009 => "Chromecast",
        8080 => "HTTP-Alt",
        8443 => "HTTPS-Alt",
        9100 => "JetDirect",
        32400 => "Plex",
        62078 => "iOS Sync",
        _ => "Unknown",
    }
}

/// One connect attempt. The connect is non-blocking under the hood: the
/// socket is polled for writability and the pending error is checked once it
/// becomes writable, bounded by `timeout`.
pub async fn probe_port(ip: Ipv4Addr, port: u16, timeout: Duration) -> Option<Duration> {
    let addr = SocketAddr::new(IpAddr::V4(ip), port);
    let start = Instant::now();

    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            drop(stream);
            Some(start.elapsed())
        }
        Ok(Err(_)) => None, // refused: closed
        Err(_) => None,     // no answer: filtered
    }
}

/// Probe a list of ports, at most `concurrency` connects in flight.
/// Results are sorted by port.
pub async fn probe_ports(
    ip: Ipv4Addr,
    ports: &[u16],
    timeout: Duration,
    concurrency: usize,
) -> Vec<OpenPort> {
    let mut open: Vec<OpenPort> = stream::iter(ports.to_vec())
        .map(|port| async move {
            probe_port(ip, port, timeout).await.map(|elapsed| OpenPort {
                port,
                label: port_label(port).to_string(),
                connect_ms: elapsed.as_millis() as u64,
            })
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|result| async move { result })
        .collect()
        .await;

    open.sort_by_key(|p| p.port);
    open
}
