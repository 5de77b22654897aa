//! Network module: ICMP echo codec, raw socket adapter and the echo prober

pub mod icmp;
pub mod packet;
pub mod socket;

pub use icmp::{
    ping_host, ping_hosts, EchoOutcome, EchoReply, IcmpProber, PingStats, ProbeTarget, Prober,
};
pub use packet::{EchoPacket, IcmpReply, ReplyKind};
