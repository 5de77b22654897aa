//! Per-hop state: a bounded window of recent round-trip times plus counters

use super::geo::GeoInfo;
use crate::network::EchoOutcome;
use crate::utils;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::net::Ipv4Addr;

/// Who answered at a given TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HopAddress {
    Responder(Ipv4Addr),
    NoResponse,
}

/// One hop on the path. `sent` and `timeouts` only count monitoring probes;
/// the discovery probe's RTT is kept apart in `discovery_rtt`.
#[derive(Debug, Clone)]
pub struct Hop {
    ttl: u8,
    address: HopAddress,
    pub hostname: Option<String>,
    pub geo: Option<GeoInfo>,
    window: VecDeque<f64>,
    capacity: usize,
    last: Option<f64>,
    sent: u64,
    timeouts: u64,
    discovery_rtt: Option<f64>,
}

impl Hop {
    pub fn new(ttl: u8, address: HopAddress, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ttl,
            address,
            hostname: None,
            geo: None,
            window: VecDeque::with_capacity(capacity),
            capacity,
            last: None,
            sent: 0,
            timeouts: 0,
            discovery_rtt: None,
        }
    }

    /// Hop answered the discovery probe after `rtt_ms`
    pub fn discovered(ttl: u8, responder: Ipv4Addr, rtt_ms: f64, capacity: usize) -> Self {
        let mut hop = Self::new(ttl, HopAddress::Responder(responder), capacity);
        hop.discovery_rtt = Some(rtt_ms);
        hop
    }

    /// Nothing answered at this TTL
    pub fn placeholder(ttl: u8, capacity: usize) -> Self {
        Self::new(ttl, HopAddress::NoResponse, capacity)
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    pub fn address(&self) -> Option<Ipv4Addr> {
        match self.address {
            HopAddress::Responder(ip) => Some(ip),
            HopAddress::NoResponse => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.address == HopAddress::NoResponse
    }

    /// Apply one monitoring probe result
    pub fn record(&mut self, outcome: &EchoOutcome) {
        self.sent += 1;
        match outcome.rtt_millis() {
            Some(rtt) => self.push_sample(rtt),
            None => self.timeouts += 1,
        }
    }

    fn push_sample(&mut self, rtt: f64) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(rtt);
        self.last = Some(rtt);
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently in the window, oldest first
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }

    pub fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.timeouts as f64 / self.sent as f64 * 100.0
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    pub fn avg(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.window.iter().sum::<f64>() / self.window.len() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.window.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.window.iter().copied().reduce(f64::max)
    }

    pub fn jitter(&self) -> f64 {
        utils::jitter(self.samples())
    }

    pub fn discovery_rtt(&self) -> Option<f64> {
        self.discovery_rtt
    }

    pub fn snapshot(&self) -> HopSnapshot {
        HopSnapshot {
            ttl: self.ttl,
            address: self.address(),
            hostname: self.hostname.clone(),
            geo: self.geo.clone(),
            sent: self.sent,
            timeouts: self.timeouts,
            loss_percent: self.loss_percent(),
            last_ms: self.last,
            avg_ms: self.avg(),
            min_ms: self.min(),
            max_ms: self.max(),
            jitter_ms: self.jitter(),
            discovery_rtt_ms: self.discovery_rtt,
        }
    }
}

/// Read-only copy of a hop handed to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopSnapshot {
    pub ttl: u8,
    /// `None` for a hop that never answered
    pub address: Option<Ipv4Addr>,
    pub hostname: Option<String>,
    pub geo: Option<GeoInfo>,
    pub sent: u64,
    pub timeouts: u64,
    pub loss_percent: f64,
    pub last_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub jitter_ms: f64,
    pub discovery_rtt_ms: Option<f64>,
}

impl HopSnapshot {
    pub fn is_placeholder(&self) -> bool {
        self.address.is_none()
    }

    /// Hostname if known, else the address, else `*`
    pub fn display_name(&self) -> String {
        match (&self.hostname, self.address) {
            (Some(name), _) => name.clone(),
            (None, Some(ip)) => ip.to_string(),
            (None, None) => "*".to_string(),
        }
    }
}
