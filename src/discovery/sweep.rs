//! Bounded-concurrency ping sweep

use crate::config::ScanConfig;
use crate::network::Prober;
use crate::utils::acquire_permit;
use log::{debug, trace};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct SweepOptions {
    pub concurrency: usize,
    pub timeout: Duration,
    /// Longest wait for a worker slot before the address is skipped
    pub permit_wait: Duration,
}

impl From<&ScanConfig> for SweepOptions {
    fn from(config: &ScanConfig) -> Self {
        Self {
            concurrency: config.sweep_concurrency,
            timeout: config.ping_timeout_duration(),
            permit_wait: config.permit_wait_duration(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepOutcome {
    /// The address itself sent an echo reply
    Alive { latency_ms: f64 },
    Silent,
    /// No worker slot became free in time
    Skipped,
}

/// What happened to one address
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepResult {
    pub ip: Ipv4Addr,
    pub outcome: SweepOutcome,
}

impl SweepResult {
    pub fn latency_ms(&self) -> Option<f64> {
        match self.outcome {
            SweepOutcome::Alive { latency_ms } => Some(latency_ms),
            _ => None,
        }
    }
}

/// Probe every host, sending one [`SweepResult`] per address to `results`.
/// Cancelling stops new probes; probes in flight finish on their own
/// timeout. Returns once every issued probe has reported.
pub async fn ping_sweep<P: Prober + 'static>(
    prober: Arc<P>,
    hosts: &[Ipv4Addr],
    options: SweepOptions,
    cancel: &CancellationToken,
    results: mpsc::Sender<SweepResult>,
) {
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut set = JoinSet::new();

    for &ip in hosts {
        if cancel.is_cancelled() {
            debug!("Sweep cancelled before {}", ip);
            break;
        }

        let Some(permit) = acquire_permit(&semaphore, options.permit_wait).await else {
            trace!("No sweep slot for {}, skipping", ip);
            let _ = results
                .send(SweepResult {
                    ip,
                    outcome: SweepOutcome::Skipped,
                })
                .await;
            continue;
        };

        let prober = prober.clone();
        let results = results.clone();
        set.spawn(async move {
            let _permit = permit;
            let outcome = prober.probe(ip, None, options.timeout).await;

            // Only the probed host's own echo reply proves it is alive
            let outcome = match (outcome.is_echo_from(ip), outcome.rtt_millis()) {
                (true, Some(latency_ms)) => SweepOutcome::Alive { latency_ms },
                _ => SweepOutcome::Silent,
            };
            let _ = results.send(SweepResult { ip, outcome }).await;
        });
    }

    while set.join_next().await.is_some() {}
}
