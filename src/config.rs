//! Configuration module for the argus engine

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest number of host addresses a neighborhood scan will enumerate (a /22)
pub const MAX_SCAN_HOSTS: u64 = 1022;

/// Well-known TCP ports probed by the device detail scan
pub const DEFAULT_DETAIL_PORTS: &[u16] = &[
    21, 22, 23, 53, 80, 139, 443, 445, 515, 548, 554, 631, 1883, 3389, 5000, 5353, 8008, 8009,
    8080, 8443, 9100, 32400, 62078,
];

/// Top-level configuration, one section per pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub probe: ProbeConfig,
    pub trace: TraceConfig,
    pub scan: ScanConfig,
    pub detail: DetailConfig,
}

/// Echo prober settings shared by every call site
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Default reply deadline in milliseconds
    pub timeout: u64,

    /// Maximum reads per probe while skipping unrelated ICMP traffic
    pub max_reads: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: 1000,
            max_reads: 32,
        }
    }
}

impl ProbeConfig {
    /// Get timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

/// Traceroute / MTR settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Highest TTL attempted during discovery
    pub max_ttl: u8,

    /// Per-attempt reply deadline in milliseconds
    pub hop_timeout: u64,

    /// Fixed pause between discovery TTLs in milliseconds (0 = back to back)
    pub pace: u64,

    /// Continuous-phase tick in milliseconds
    pub interval: u64,

    /// Rolling sample window capacity per hop
    pub window: usize,

    /// Reverse-resolve hop addresses
    pub resolve_hostnames: bool,

    /// Look up geolocation/ISP for public hop addresses
    pub geolocate: bool,

    /// Geolocation endpoint, the address is appended
    pub geo_endpoint: String,

    /// Geolocation request timeout in milliseconds
    pub geo_timeout: u64,

    /// Concurrent reverse DNS lookups
    pub dns_concurrency: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_ttl: 30,
            hop_timeout: 1000,
            pace: 50,
            interval: 1000,
            window: 100,
            resolve_hostnames: true,
            geolocate: true,
            geo_endpoint: "http://ip-api.com/json/".to_string(),
            geo_timeout: 3000,
            dns_concurrency: 10,
        }
    }
}

impl TraceConfig {
    pub fn hop_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.hop_timeout)
    }

    pub fn pace_duration(&self) -> Duration {
        Duration::from_millis(self.pace)
    }

    pub fn interval_duration(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn geo_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.geo_timeout)
    }

    /// Continuous probes must settle before the next tick
    pub fn monitor_timeout_duration(&self) -> Duration {
        let cap = self.interval.saturating_sub(self.interval / 10).max(1);
        Duration::from_millis(self.hop_timeout.min(cap))
    }
}

/// Neighborhood scan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Interface to scan from; the first active IPv4 interface when unset
    pub interface: Option<String>,

    /// Host-address cap for a single scan
    pub max_hosts: u64,

    /// Concurrent ARP priming sends
    pub prime_concurrency: usize,

    /// UDP port used for priming datagrams
    pub prime_port: u16,

    /// Wait after priming before the neighbor table is read, in milliseconds
    pub settle: u64,

    /// Concurrent echo probes during the sweep
    pub sweep_concurrency: usize,

    /// Sweep echo timeout in milliseconds
    pub ping_timeout: u64,

    /// Longest wait for a worker permit before an address is skipped, in milliseconds
    pub permit_wait: u64,

    /// Reverse-resolve discovered devices
    pub resolve_hostnames: bool,

    /// Concurrent reverse DNS lookups
    pub dns_concurrency: usize,

    /// Reverse DNS timeout in milliseconds
    pub dns_timeout: u64,

    /// mDNS listen window in milliseconds (0 disables service discovery)
    pub service_window: u64,

    /// Optional Wireshark `manuf` file merged over the builtin OUI table
    pub oui_file: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interface: None,
            max_hosts: MAX_SCAN_HOSTS,
            prime_concurrency: 40,
            prime_port: 33434,
            settle: 500,
            sweep_concurrency: 20,
            ping_timeout: 500,
            permit_wait: 5000,
            resolve_hostnames: true,
            dns_concurrency: 10,
            dns_timeout: 1000,
            service_window: 8000,
            oui_file: None,
        }
    }
}

impl ScanConfig {
    pub fn settle_duration(&self) -> Duration {
        Duration::from_millis(self.settle)
    }

    pub fn ping_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }

    pub fn permit_wait_duration(&self) -> Duration {
        Duration::from_millis(self.permit_wait)
    }

    pub fn dns_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.dns_timeout)
    }

    pub fn service_window_duration(&self) -> Duration {
        Duration::from_millis(self.service_window)
    }

    /// Scan a specific interface
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Enable or disable reverse DNS
    pub fn with_hostnames(mut self, enabled: bool) -> Self {
        self.resolve_hostnames = enabled;
        self
    }

    /// Set the mDNS listen window (0 disables it)
    pub fn with_service_window(mut self, millis: u64) -> Self {
        self.service_window = millis;
        self
    }

    /// Set the settle delay after priming
    pub fn with_settle(mut self, millis: u64) -> Self {
        self.settle = millis;
        self
    }
}

/// Device detail deep-probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetailConfig {
    /// Number of echo samples
    pub ping_count: usize,

    /// Pause between echo samples in milliseconds
    pub ping_interval: u64,

    /// Echo timeout in milliseconds
    pub ping_timeout: u64,

    /// Ports probed with a TCP connect
    pub ports: Vec<u16>,

    /// Per-port connect timeout in milliseconds
    pub port_timeout: u64,

    /// Concurrent connect attempts
    pub port_concurrency: usize,

    /// mDNS listen window in milliseconds (0 disables service discovery)
    pub service_window: u64,

    /// Reverse DNS timeout in milliseconds
    pub dns_timeout: u64,
}

impl Default for DetailConfig {
    fn default() -> Self {
        Self {
            ping_count: 10,
            ping_interval: 200,
            ping_timeout: 1000,
            ports: DEFAULT_DETAIL_PORTS.to_vec(),
            port_timeout: 300,
            port_concurrency: 16,
            service_window: 3000,
            dns_timeout: 1000,
        }
    }
}

impl DetailConfig {
    pub fn ping_interval_duration(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }

    pub fn ping_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }

    pub fn port_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.port_timeout)
    }

    pub fn service_window_duration(&self) -> Duration {
        Duration::from_millis(self.service_window)
    }

    pub fn dns_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.dns_timeout)
    }
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::ScanError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Location of the per-user config file
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".argus.toml"))
    }

    /// Load configuration from default locations
    pub fn load_default_config() -> Self {
        if let Some(path) = Self::default_path() {
            if path.exists() {
                match Self::from_toml_file(&path) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", path.display());
                        return config;
                    }
                    Err(e) => log::warn!("Ignoring {}: {}", path.display(), e),
                }
            }
        }

        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        use crate::ScanError::ConfigError;

        if self.probe.max_reads == 0 {
            return Err(ConfigError("probe.max_reads must be greater than 0".to_string()));
        }
        if self.trace.max_ttl == 0 {
            return Err(ConfigError("trace.max_ttl must be greater than 0".to_string()));
        }
        if self.trace.window == 0 {
            return Err(ConfigError("trace.window must be greater than 0".to_string()));
        }
        if self.trace.interval == 0 {
            return Err(ConfigError("trace.interval must be greater than 0".to_string()));
        }
        if self.scan.max_hosts > MAX_SCAN_HOSTS {
            return Err(ConfigError(format!(
                "scan.max_hosts cannot exceed {}",
                MAX_SCAN_HOSTS
            )));
        }
        if self.scan.prime_concurrency == 0
            || self.scan.sweep_concurrency == 0
            || self.scan.dns_concurrency == 0
            || self.trace.dns_concurrency == 0
            || self.detail.port_concurrency == 0
        {
            return Err(ConfigError("Concurrency limits must be greater than 0".to_string()));
        }
        if self.detail.ping_count == 0 {
            return Err(ConfigError("detail.ping_count must be greater than 0".to_string()));
        }

        Ok(())
    }
}
