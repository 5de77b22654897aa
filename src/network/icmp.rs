//! Echo prober: one ICMP echo, one bounded wait for the matching reply
//!
//! Every feature that pings (single ping, multi-target ping, the sweep, MTR,
//! device detail) goes through the [`Prober`] trait so identifier, sequence,
//! TTL and timeout handling live in one place.

use super::packet::{self, EchoPacket, ReplyKind};
use super::socket::RawIcmpSocket;
use crate::config::ProbeConfig;
use crate::utils::{latency_summary, LatencySummary};
use async_trait::async_trait;
use log::{debug, trace};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identifier stamped on every echo request sent by this process
static IDENTIFIER: Lazy<u16> = Lazy::new(|| (std::process::id() as u16) ^ rand::random::<u16>());

/// Process-wide sequence counter, so concurrent probers never reuse a pair
static SEQUENCE: AtomicU16 = AtomicU16::new(1);

/// Identifier used for this run
pub fn process_identifier() -> u16 {
    *IDENTIFIER
}

fn next_sequence() -> u16 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// A successful echo exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoReply {
    pub rtt: Duration,
    /// Who answered: the target itself or a router on the way
    pub responder: Ipv4Addr,
    pub kind: ReplyKind,
}

/// Result of a single echo probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EchoOutcome {
    Reply(EchoReply),
    Timeout,
}

impl EchoOutcome {
    pub fn reply(&self) -> Option<&EchoReply> {
        match self {
            EchoOutcome::Reply(reply) => Some(reply),
            EchoOutcome::Timeout => None,
        }
    }

    pub fn is_reply(&self) -> bool {
        matches!(self, EchoOutcome::Reply(_))
    }

    /// Round-trip time in milliseconds, if any
    pub fn rtt_millis(&self) -> Option<f64> {
        self.reply().map(|r| r.rtt.as_secs_f64() * 1000.0)
    }

    /// True when `target` itself sent an echo reply
    pub fn is_echo_from(&self, target: Ipv4Addr) -> bool {
        matches!(
            self,
            EchoOutcome::Reply(r) if r.kind == ReplyKind::EchoReply && r.responder == target
        )
    }
}

/// Anything that can run one echo exchange
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `target`, optionally with a custom IP TTL, waiting at most `timeout`
    async fn probe(&self, target: Ipv4Addr, ttl: Option<u8>, timeout: Duration) -> EchoOutcome;
}

#[async_trait]
impl<P: Prober + ?Sized> Prober for Arc<P> {
    async fn probe(&self, target: Ipv4Addr, ttl: Option<u8>, timeout: Duration) -> EchoOutcome {
        (**self).probe(target, ttl, timeout).await
    }
}

/// Raw-socket ICMP prober
#[derive(Debug, Clone)]
pub struct IcmpProber {
    identifier: u16,
    max_reads: usize,
}

impl IcmpProber {
    /// Create a prober, failing up front when raw sockets are unavailable.
    /// Later per-probe socket failures are reported as timeouts.
    pub fn new(config: &ProbeConfig) -> crate::Result<Self> {
        drop(RawIcmpSocket::open()?);

        Ok(Self {
            identifier: process_identifier(),
            max_reads: config.max_reads.max(1),
        })
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    fn probe_blocking(
        &self,
        target: Ipv4Addr,
        ttl: Option<u8>,
        timeout: Duration,
        sequence: u16,
    ) -> std::io::Result<Option<EchoReply>> {
        let socket = RawIcmpSocket::open()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        if let Some(ttl) = ttl {
            socket.set_ttl(ttl)?;
        }

        let request = EchoPacket::request(self.identifier, sequence).encode();
        let start = Instant::now();
        let deadline = start + timeout;
        socket.send_to(&request, target)?;

        let mut buf = RawIcmpSocket::recv_buffer();
        let mut failure = None;
        let datagrams = std::iter::from_fn(|| match socket.recv_until(&mut buf, deadline) {
            Ok(Some(n)) => Some(buf[..n].to_vec()),
            Ok(None) => None,
            Err(e) => {
                failure = Some(e);
                None
            }
        });
        let matched = packet::first_match(datagrams, self.identifier, sequence, self.max_reads);

        if let Some(e) = failure {
            return Err(e);
        }
        if matched.is_none() {
            trace!("No matching ICMP reply from {}", target);
        }
        Ok(matched.map(|reply| EchoReply {
            rtt: start.elapsed(),
            responder: reply.source,
            kind: reply.kind,
        }))
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, target: Ipv4Addr, ttl: Option<u8>, timeout: Duration) -> EchoOutcome {
        let prober = self.clone();
        let sequence = next_sequence();

        let result = tokio::task::spawn_blocking(move || {
            prober.probe_blocking(target, ttl, timeout, sequence)
        })
        .await;

        match result {
            Ok(Ok(Some(reply))) => EchoOutcome::Reply(reply),
            Ok(Ok(None)) => EchoOutcome::Timeout,
            Ok(Err(e)) => {
                debug!("Echo probe to {} failed: {}", target, e);
                EchoOutcome::Timeout
            }
            Err(e) => {
                debug!("Echo probe task for {} aborted: {}", target, e);
                EchoOutcome::Timeout
            }
        }
    }
}

/// A resolved IPv4 address plus the name the caller used for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeTarget {
    pub address: Ipv4Addr,
    pub name: Option<String>,
}

impl ProbeTarget {
    pub fn new(address: Ipv4Addr) -> Self {
        Self { address, name: None }
    }

    /// Resolve a literal address or hostname to its first IPv4 address
    pub async fn resolve(host: &str) -> crate::Result<Self> {
        if let Ok(address) = host.parse::<Ipv4Addr>() {
            return Ok(Self::new(address));
        }

        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| crate::ScanError::ResolveError(format!("{}: {}", host, e)))?;

        addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .next()
            .map(|address| Self {
                address,
                name: Some(host.to_string()),
            })
            .ok_or_else(|| crate::ScanError::ResolveError(format!("{}: no IPv4 address", host)))
    }

    /// Name if one was given, the address otherwise
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.address.to_string())
    }
}

/// Repeated-ping statistics for one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingStats {
    pub target: Ipv4Addr,
    pub sent: usize,
    pub received: usize,
    pub latency: Option<LatencySummary>,
    pub loss_percent: f64,
}

impl PingStats {
    /// Summarize outcomes; only echo replies from `target` count as received
    pub fn from_outcomes(target: Ipv4Addr, outcomes: &[EchoOutcome]) -> Self {
        let samples: Vec<f64> = outcomes
            .iter()
            .filter(|o| o.is_echo_from(target))
            .filter_map(|o| o.rtt_millis())
            .collect();
        let sent = outcomes.len();
        let received = samples.len();
        let loss_percent = if sent == 0 {
            0.0
        } else {
            (sent - received) as f64 / sent as f64 * 100.0
        };

        Self {
            target,
            sent,
            received,
            latency: latency_summary(&samples),
            loss_percent,
        }
    }
}

/// Ping one host `count` times, `interval` apart
pub async fn ping_host<P: Prober + ?Sized>(
    prober: &P,
    target: Ipv4Addr,
    count: usize,
    interval: Duration,
    timeout: Duration,
) -> PingStats {
    let mut outcomes = Vec::with_capacity(count);

    for i in 0..count {
        if i > 0 && !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
        outcomes.push(prober.probe(target, None, timeout).await);
    }

    PingStats::from_outcomes(target, &outcomes)
}

/// Ping multiple hosts concurrently
pub async fn ping_hosts<P: Prober + ?Sized>(
    prober: &P,
    targets: &[Ipv4Addr],
    count: usize,
    interval: Duration,
    timeout: Duration,
) -> Vec<PingStats> {
    let tasks = targets
        .iter()
        .map(|&target| ping_host(prober, target, count, interval, timeout));

    futures::future::join_all(tasks).await
}
