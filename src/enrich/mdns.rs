//! Multicast DNS service discovery
//!
//! Every known service type is browsed at once for the length of the window.
//! Resolved instances are attributed to each IPv4 address they advertise.

use log::{debug, trace};
use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Service types browsed, with the label reported for each
pub const SERVICE_TYPES: &[(&str, &str)] = &[
    ("_http._tcp.local.", "HTTP"),
    ("_https._tcp.local.", "HTTPS"),
    ("_ssh._tcp.local.", "SSH"),
    ("_sftp-ssh._tcp.local.", "SFTP"),
    ("_smb._tcp.local.", "SMB"),
    ("_afpovertcp._tcp.local.", "AFP"),
    ("_nfs._tcp.local.", "NFS"),
    ("_ipp._tcp.local.", "IPP Printer"),
    ("_ipps._tcp.local.", "IPP Printer"),
    ("_printer._tcp.local.", "LPD Printer"),
    ("_pdl-datastream._tcp.local.", "Printer"),
    ("_scanner._tcp.local.", "Scanner"),
    ("_uscan._tcp.local.", "Scanner"),
    ("_airplay._tcp.local.", "AirPlay"),
    ("_raop._tcp.local.", "AirPlay Audio"),
    ("_googlecast._tcp.local.", "Chromecast"),
    ("_spotify-connect._tcp.local.", "Spotify Connect"),
    ("_sonos._tcp.local.", "Sonos"),
    ("_daap._tcp.local.", "iTunes Sharing"),
    ("_companion-link._tcp.local.", "Apple Device"),
    ("_device-info._tcp.local.", "Device Info"),
    ("_workstation._tcp.local.", "Workstation"),
    ("_rfb._tcp.local.", "Screen Sharing"),
    ("_hap._tcp.local.", "HomeKit"),
    ("_matter._tcp.local.", "Matter"),
    ("_homeassistant._tcp.local.", "Home Assistant"),
    ("_mqtt._tcp.local.", "MQTT"),
];

/// Browse the link and collect advertised services per responder until
/// `window` elapses or `cancel` fires. A zero window returns nothing.
pub async fn discover_services(
    window: Duration,
    cancel: &CancellationToken,
) -> crate::Result<HashMap<Ipv4Addr, BTreeSet<String>>> {
    let mut services: HashMap<Ipv4Addr, BTreeSet<String>> = HashMap::new();
    if window.is_zero() || cancel.is_cancelled() {
        return Ok(services);
    }

    let daemon = ServiceDaemon::new()
        .map_err(|e| crate::ScanError::NetworkError(format!("mDNS daemon: {}", e)))?;
    let deadline = Instant::now() + window;

    let mut browses = Vec::with_capacity(SERVICE_TYPES.len());
    for &(service, label) in SERVICE_TYPES {
        let receiver = match daemon.browse(service) {
            Ok(receiver) => receiver,
            Err(e) => {
                debug!("Cannot browse {}: {}", service, e);
                continue;
            }
        };

        browses.push(async move {
            let mut found = Vec::new();
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = tokio::time::timeout_at(deadline, receiver.recv_async()) => event,
                };
                match event {
                    Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                        for scoped_ip in info.get_addresses() {
                            if let IpAddr::V4(ip) = scoped_ip.to_ip_addr() {
                                trace!("mDNS {} advertises {}", ip, info.get_fullname());
                                found.push((ip, label));
                            }
                        }
                    }
                    Ok(Ok(_)) => continue,
                    Ok(Err(_)) | Err(_) => break,
                }
            }
            found
        });
    }

    let found = futures::future::join_all(browses).await;

    for &(service, _) in SERVICE_TYPES {
        daemon.stop_browse(service).ok();
    }
    daemon.shutdown().ok();

    for (ip, label) in found.into_iter().flatten() {
        services.entry(ip).or_default().insert(label.to_string());
    }
    debug!("mDNS window closed with {} responders", services.len());
    Ok(services)
}

/// Services advertised by a single address
pub async fn services_for(ip: Ipv4Addr, window: Duration) -> crate::Result<BTreeSet<String>> {
    let mut all = discover_services(window, &CancellationToken::new()).await?;
    Ok(all.remove(&ip).unwrap_or_default())
}
