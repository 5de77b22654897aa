//! Raw ICMP socket adapter
//!
//! A thin blocking wrapper; all byte layout work happens in
//! [`packet`](super::packet). The socket closes when the value is dropped, so
//! every exit path of a probe releases its descriptor.

use crate::ScanError;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

/// Largest datagram we bother reading: IP header with options, ICMP header,
/// quoted inner header and our echo message
const RECV_BUFFER_LEN: usize = 1500;

/// Raw IPv4 ICMP socket used for a single probe
pub struct RawIcmpSocket {
    socket: Socket,
}

impl RawIcmpSocket {
    /// Open a raw ICMP socket, keeping permission failures distinct
    pub fn open() -> crate::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(|e| ScanError::from_socket_error(e, "Permission denied for ICMP socket"))?;

        Ok(Self { socket })
    }

    /// Set the outgoing IP TTL
    pub fn set_ttl(&self, ttl: u8) -> io::Result<()> {
        self.socket.set_ttl(ttl as u32)
    }

    /// Send an encoded ICMP message
    pub fn send_to(&self, packet: &[u8], target: Ipv4Addr) -> io::Result<usize> {
        let dest = SockAddr::from(SocketAddr::new(IpAddr::V4(target), 0));
        self.socket.send_to(packet, &dest)
    }

    /// Read one datagram, waiting no later than `deadline`.
    /// `Ok(None)` means the deadline passed without data.
    pub fn recv_until(&self, buf: &mut [u8], deadline: Instant) -> io::Result<Option<usize>> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        // A zero read timeout means "block forever" to the OS
        self.socket
            .set_read_timeout(Some(remaining.max(Duration::from_millis(1))))?;

        match (&self.socket).read(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Buffer sized for any reply we care about
    pub fn recv_buffer() -> Vec<u8> {
        vec![0u8; RECV_BUFFER_LEN]
    }
}
