//! Error handling for the argus engine
//!
//! Transient probe failures are not errors: a missing reply is the
//! [`EchoOutcome::Timeout`](crate::network::icmp::EchoOutcome) outcome and only
//! feeds loss statistics. The variants below cover setup-time conditions that
//! stop an operation from starting at all.

use thiserror::Error;

/// Main error type for probing and discovery operations
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Permission denied: {0}")]
    PermissionError(String),

    #[error("Cannot resolve target: {0}")]
    ResolveError(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("No usable IPv4 subnet: {0}")]
    SubnetUnavailable(String),

    #[error("Subnet too large: {hosts} host addresses exceeds the cap of {cap}")]
    CapacityExceeded { hosts: u64, cap: u64 },

    #[error("No candidate addresses to scan")]
    NoCandidates,

    #[error("A scan is already running")]
    ScanInProgress,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Result type alias for engine operations
pub type ScanResult<T> = Result<T, ScanError>;

impl ScanError {
    /// Map a socket creation failure, keeping permission problems distinct
    pub fn from_socket_error(e: std::io::Error, what: &str) -> Self {
        if e.kind() == std::io::ErrorKind::PermissionDenied
            || e.raw_os_error() == Some(libc::EPERM)
        {
            ScanError::PermissionError(format!(
                "{}: raw ICMP sockets need root or CAP_NET_RAW ({})",
                what, e
            ))
        } else {
            ScanError::NetworkError(format!("{}: {}", what, e))
        }
    }

    /// Whether this error means the operation could not start at all,
    /// as opposed to an I/O hiccup after it began
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            ScanError::PermissionError(_)
                | ScanError::ResolveError(_)
                | ScanError::SubnetUnavailable(_)
                | ScanError::CapacityExceeded { .. }
                | ScanError::NoCandidates
                | ScanError::ScanInProgress
                | ScanError::ConfigError(_)
        )
    }
}

impl From<std::net::AddrParseError> for ScanError {
    fn from(e: std::net::AddrParseError) -> Self {
        ScanError::InvalidTarget(format!("Invalid IP address: {}", e))
    }
}

impl From<std::num::ParseIntError> for ScanError {
    fn from(e: std::num::ParseIntError) -> Self {
        ScanError::ParseError(format!("Invalid number: {}", e))
    }
}

impl From<toml::de::Error> for ScanError {
    fn from(e: toml::de::Error) -> Self {
        ScanError::ConfigError(format!("Failed to parse TOML: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_is_distinct() {
        let io = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        let err = ScanError::from_socket_error(io, "open ICMP socket");
        assert!(matches!(err, ScanError::PermissionError(_)));
        assert!(err.is_setup_failure());

        let io = std::io::Error::from(std::io::ErrorKind::AddrNotAvailable);
        let err = ScanError::from_socket_error(io, "open ICMP socket");
        assert!(matches!(err, ScanError::NetworkError(_)));
        assert!(!err.is_setup_failure());
    }

    #[test]
    fn test_capacity_message() {
        let err = ScanError::CapacityExceeded { hosts: 65534, cap: 1022 };
        assert_eq!(
            err.to_string(),
            "Subnet too large: 65534 host addresses exceeds the cap of 1022"
        );
    }

    #[test]
    fn test_addr_parse_conversion() {
        let err: ScanError = "300.1.1.1".parse::<std::net::Ipv4Addr>().unwrap_err().into();
        assert!(matches!(err, ScanError::InvalidTarget(_)));
    }
}
