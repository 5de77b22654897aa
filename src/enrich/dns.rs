//! Reverse DNS lookups with a hard timeout

use futures::stream::{self, StreamExt};
use log::trace;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Clean up a resolver answer. Some resolvers echo the query back as the
/// name; that counts as no name at all.
pub fn normalize_hostname(ip: Ipv4Addr, name: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name == ip.to_string() || name.parse::<IpAddr>().is_ok() {
        return None;
    }
    Some(name.to_string())
}

/// Single-shot PTR lookup. The resolver call is blocking, so it runs on the
/// blocking pool and is abandoned once `timeout` elapses.
pub async fn reverse_lookup(ip: Ipv4Addr, timeout: Duration) -> Option<String> {
    let lookup = tokio::task::spawn_blocking(move || dns_lookup::lookup_addr(&IpAddr::V4(ip)));

    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(Ok(name))) => normalize_hostname(ip, &name),
        Ok(Ok(Err(e))) => {
            trace!("No PTR record for {}: {}", ip, e);
            None
        }
        _ => {
            trace!("Reverse lookup for {} timed out", ip);
            None
        }
    }
}

/// Resolve many addresses, at most `concurrency` lookups in flight
pub async fn reverse_lookup_many(
    ips: Vec<Ipv4Addr>,
    concurrency: usize,
    timeout: Duration,
) -> HashMap<Ipv4Addr, String> {
    stream::iter(ips)
        .map(|ip| async move { (ip, reverse_lookup(ip, timeout).await) })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|(ip, name)| async move { name.map(|n| (ip, n)) })
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echoed_address_is_no_name() {
        let ip = Ipv4Addr::new(192, 168, 1, 7);
        assert_eq!(normalize_hostname(ip, "192.168.1.7"), None);
        assert_eq!(normalize_hostname(ip, ""), None);
        assert_eq!(normalize_hostname(ip, "10.0.0.1"), None);
    }

    #[test]
    fn test_trailing_dot_is_trimmed() {
        let ip = Ipv4Addr::new(192, 168, 1, 7);
        assert_eq!(
            normalize_hostname(ip, "printer.lan."),
            Some("printer.lan".to_string())
        );
    }
}
