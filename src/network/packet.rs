//! ICMP echo codec
//!
//! The wire layout lives in [`EchoPacket`], a fixed 64-byte record with a pure
//! encode/decode pair. Received datagrams (IPv4 header included, as delivered
//! by a raw socket) go through [`parse_reply`], which also digs the original
//! identifier/sequence out of "time exceeded" errors so a router's answer can
//! be attributed to the probe that triggered it. Nothing here touches a socket.

use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{Ipv4Packet, MutableIpv4Packet};
use pnet::packet::Packet;
use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Total size of an encoded echo message
pub const ECHO_PACKET_LEN: usize = 64;

/// ICMP header: type, code, checksum, identifier, sequence
pub const ICMP_HEADER_LEN: usize = 8;

/// Bytes following the header
pub const ECHO_PAYLOAD_LEN: usize = ECHO_PACKET_LEN - ICMP_HEADER_LEN;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_TIME_EXCEEDED: u8 = 11;

const IPV4_MIN_HEADER_LEN: usize = 20;

/// One's-complement sum of 16-bit big-endian words with end-around carry,
/// complemented. An odd trailing byte is padded with zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;

    for chunk in data.chunks(2) {
        if chunk.len() == 2 {
            sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        } else {
            sum += (chunk[0] as u32) << 8;
        }
    }

    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

/// A message whose checksum field is intact folds to zero
pub fn verify_checksum(data: &[u8]) -> bool {
    data.len() >= ICMP_HEADER_LEN && checksum(data) == 0
}

/// Fixed-size ICMP echo request/reply record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoPacket {
    pub icmp_type: u8,
    pub code: u8,
    /// Checksum as last encoded or decoded; recomputed by [`EchoPacket::encode`]
    pub checksum: u16,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: [u8; ECHO_PAYLOAD_LEN],
}

impl EchoPacket {
    /// Echo request stamped with the current wall-clock time
    pub fn request(identifier: u16, sequence: u16) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Self::with_timestamp(ICMP_ECHO_REQUEST, identifier, sequence, nanos)
    }

    /// Echo reply mirroring a request, as a responding host would send it
    pub fn reply_to(request: &EchoPacket) -> Self {
        Self {
            icmp_type: ICMP_ECHO_REPLY,
            code: 0,
            checksum: 0,
            ..*request
        }
    }

    /// Build a message with an explicit timestamp; the rest of the payload is a
    /// fixed fill pattern
    pub fn with_timestamp(icmp_type: u8, identifier: u16, sequence: u16, nanos: u64) -> Self {
        let mut payload = [0u8; ECHO_PAYLOAD_LEN];
        payload[..8].copy_from_slice(&nanos.to_be_bytes());
        for (i, byte) in payload.iter_mut().enumerate().skip(8) {
            *byte = 0x20 + (i as u8 % 0x5F);
        }

        Self {
            icmp_type,
            code: 0,
            checksum: 0,
            identifier,
            sequence,
            payload,
        }
    }

    /// Send timestamp carried in the first payload bytes
    pub fn timestamp_nanos(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.payload[..8]);
        u64::from_be_bytes(raw)
    }

    /// Serialize, computing the checksum over the message with the field zeroed
    pub fn encode(&self) -> [u8; ECHO_PACKET_LEN] {
        let mut buf = [0u8; ECHO_PACKET_LEN];
        buf[0] = self.icmp_type;
        buf[1] = self.code;
        buf[4..6].copy_from_slice(&self.identifier.to_be_bytes());
        buf[6..8].copy_from_slice(&self.sequence.to_be_bytes());
        buf[ICMP_HEADER_LEN..].copy_from_slice(&self.payload);

        let sum = checksum(&buf);
        buf[2..4].copy_from_slice(&sum.to_be_bytes());
        buf
    }

    /// Parse a bare ICMP echo message (no IP header). Rejects short buffers,
    /// non-echo types and bad checksums.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < ECHO_PACKET_LEN {
            return None;
        }
        let buf = &buf[..ECHO_PACKET_LEN];
        if buf[0] != ICMP_ECHO_REQUEST && buf[0] != ICMP_ECHO_REPLY {
            return None;
        }
        if !verify_checksum(buf) {
            return None;
        }

        let mut payload = [0u8; ECHO_PAYLOAD_LEN];
        payload.copy_from_slice(&buf[ICMP_HEADER_LEN..]);

        Some(Self {
            icmp_type: buf[0],
            code: buf[1],
            checksum: u16::from_be_bytes([buf[2], buf[3]]),
            identifier: u16::from_be_bytes([buf[4], buf[5]]),
            sequence: u16::from_be_bytes([buf[6], buf[7]]),
            payload,
        })
    }
}

/// How a matching reply relates to the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReplyKind {
    /// Type 0: the probed address answered
    EchoReply,
    /// Type 11 code 0: a router on the path dropped the probe at TTL zero
    TimeExceeded,
}

/// Header facts extracted from a received datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcmpReply {
    /// Sender of the ICMP message (the host or the router)
    pub source: Ipv4Addr,
    pub kind: ReplyKind,
    /// Identifier of the echo request this answers
    pub identifier: u16,
    /// Sequence of the echo request this answers
    pub sequence: u16,
    /// TTL of the received datagram
    pub ttl: u8,
}

/// Locate the ICMP message inside an IPv4 datagram.
/// Returns the header view and the bytes after the variable-length header.
fn icmp_in_ipv4(datagram: &[u8]) -> Option<(Ipv4Packet<'_>, &[u8])> {
    let ip = Ipv4Packet::new(datagram)?;
    if ip.get_version() != 4 || ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
        return None;
    }

    let header_len = (datagram[0] & 0x0F) as usize * 4;
    if header_len < IPV4_MIN_HEADER_LEN || datagram.len() < header_len + ICMP_HEADER_LEN {
        return None;
    }

    Some((ip, &datagram[header_len..]))
}

/// Interpret a raw-socket datagram. Anything that is not an intact echo reply
/// or a time-exceeded error quoting one of our echo requests yields `None`.
pub fn parse_reply(datagram: &[u8]) -> Option<IcmpReply> {
    let (ip, icmp) = icmp_in_ipv4(datagram)?;
    if !verify_checksum(icmp) {
        return None;
    }

    let (kind, identifier, sequence) = match (icmp[0], icmp[1]) {
        (ICMP_ECHO_REPLY, 0) => (
            ReplyKind::EchoReply,
            u16::from_be_bytes([icmp[4], icmp[5]]),
            u16::from_be_bytes([icmp[6], icmp[7]]),
        ),
        (ICMP_TIME_EXCEEDED, 0) => {
            // Quoted original: inner IPv4 header plus at least 8 bytes of our request
            let (_, inner) = icmp_in_ipv4(&icmp[ICMP_HEADER_LEN..])?;
            if inner[0] != ICMP_ECHO_REQUEST {
                return None;
            }
            (
                ReplyKind::TimeExceeded,
                u16::from_be_bytes([inner[4], inner[5]]),
                u16::from_be_bytes([inner[6], inner[7]]),
            )
        }
        _ => return None,
    };

    Some(IcmpReply {
        source: ip.get_source(),
        kind,
        identifier,
        sequence,
        ttl: ip.get_ttl(),
    })
}

/// Accept a datagram only if it answers the probe `(identifier, sequence)`
pub fn match_reply(datagram: &[u8], identifier: u16, sequence: u16) -> Option<IcmpReply> {
    parse_reply(datagram).filter(|r| r.identifier == identifier && r.sequence == sequence)
}

/// First datagram among at most `max_reads` that answers `(identifier,
/// sequence)`. The source is never pulled past the cap, so a reply arriving
/// after `max_reads` foreign datagrams is not seen.
pub fn first_match<I>(
    datagrams: I,
    identifier: u16,
    sequence: u16,
    max_reads: usize,
) -> Option<IcmpReply>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    datagrams
        .into_iter()
        .take(max_reads)
        .find_map(|datagram| match_reply(datagram.as_ref(), identifier, sequence))
}

/// Wrap an ICMP message in a 20-byte IPv4 header, the shape a raw socket
/// delivers. Used to quote originals in time-exceeded messages and to
/// simulate replies.
pub fn wrap_ipv4(source: Ipv4Addr, destination: Ipv4Addr, ttl: u8, icmp: &[u8]) -> Vec<u8> {
    let total_len = IPV4_MIN_HEADER_LEN + icmp.len();
    let mut buf = vec![0u8; total_len];

    if let Some(mut ip) = MutableIpv4Packet::new(&mut buf) {
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length(total_len as u16);
        ip.set_ttl(ttl);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
        ip.set_source(source);
        ip.set_destination(destination);
        let sum = pnet::packet::ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(sum);
    }
    buf[IPV4_MIN_HEADER_LEN..].copy_from_slice(icmp);
    buf
}

/// Build the time-exceeded message a router sends back, quoting the original
/// datagram's IP header and first 8 ICMP bytes
pub fn time_exceeded(router: Ipv4Addr, prober: Ipv4Addr, original: &[u8]) -> Vec<u8> {
    let quoted_len = Ipv4Packet::new(original)
        .map(|ip| ip.get_header_length() as usize * 4 + ICMP_HEADER_LEN)
        .unwrap_or(original.len())
        .min(original.len());

    let mut icmp = vec![0u8; ICMP_HEADER_LEN + quoted_len];
    icmp[0] = ICMP_TIME_EXCEEDED;
    icmp[ICMP_HEADER_LEN..].copy_from_slice(&original[..quoted_len]);
    let sum = checksum(&icmp);
    icmp[2..4].copy_from_slice(&sum.to_be_bytes());

    wrap_ipv4(router, prober, 64, &icmp)
}
