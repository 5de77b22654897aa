//! Shared helpers: latency statistics, bounded permit acquisition and address
//! classification

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Latency figures in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub median: f64,
    pub jitter: f64,
}

/// Mean absolute difference between consecutive samples, 0 with fewer than two
pub fn jitter<I>(samples: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut previous: Option<f64> = None;
    let mut total = 0.0;
    let mut count = 0usize;

    for sample in samples {
        if let Some(prev) = previous {
            total += (sample - prev).abs();
            count += 1;
        }
        previous = Some(sample);
    }

    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Median of the samples (mean of the middle pair for even counts)
pub fn median(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Summarize samples kept in arrival order
pub fn latency_summary(samples: &[f64]) -> Option<LatencySummary> {
    let median = median(samples)?;
    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = samples.iter().sum::<f64>() / samples.len() as f64;

    Some(LatencySummary {
        min,
        max,
        avg,
        median,
        jitter: jitter(samples.iter().copied()),
    })
}

/// Acquire a worker permit, giving up after `wait`. A `None` means the caller
/// should skip its unit of work instead of stalling the batch.
pub async fn acquire_permit(
    semaphore: &Arc<Semaphore>,
    wait: Duration,
) -> Option<OwnedSemaphorePermit> {
    match tokio::time::timeout(wait, semaphore.clone().acquire_owned()).await {
        Ok(Ok(permit)) => Some(permit),
        _ => None,
    }
}

/// RFC 1918 private ranges
pub fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private()
}

/// Whether a public geolocation lookup makes sense for this address
pub fn is_geolocatable(ip: Ipv4Addr) -> bool {
    !(is_private_v4(ip)
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_multicast()
        || ip.is_documentation())
}
