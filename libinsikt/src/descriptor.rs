use crate::duration::Duration;
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Transport protocol of a classified packet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Protocol {
    Tcp,
    Udp,
    /// Any other IP protocol, with its protocol number
    Other(u8),
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
            Protocol::Other(p) => write!(f, "ip-proto-{p}"),
        }
    }
}

/// Fields extracted from one classified frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PacketDescriptor {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub protocol: Protocol,
    /// Source port, 0 if the protocol has no ports
    pub src_port: u16,
    /// Destination port, 0 if the protocol has no ports
    pub dst_port: u16,
    /// Transport payload length, in bytes
    pub payload_len: usize,
    /// TCP sequence number (TCP only)
    pub seq: Option<u32>,
    /// True if a TCP segment carries application data
    pub app_payload: bool,
    /// Capture timestamp
    pub ts: Duration,
}

impl PacketDescriptor {
    /// Build a TCP descriptor
    pub fn tcp(src: IpAddr, dst: IpAddr, src_port: u16, dst_port: u16, seq: u32, payload_len: usize) -> Self {
        PacketDescriptor {
            src,
            dst,
            protocol: Protocol::Tcp,
            src_port,
            dst_port,
            payload_len,
            seq: Some(seq),
            app_payload: payload_len > 0,
            ts: Duration::default(),
        }
    }

    /// Build a UDP descriptor
    pub fn udp(src: IpAddr, dst: IpAddr, src_port: u16, dst_port: u16, payload_len: usize) -> Self {
        PacketDescriptor {
            src,
            dst,
            protocol: Protocol::Udp,
            src_port,
            dst_port,
            payload_len,
            seq: None,
            app_payload: false,
            ts: Duration::default(),
        }
    }

    /// Build a descriptor for a protocol without ports
    pub fn other(src: IpAddr, dst: IpAddr, proto: u8) -> Self {
        PacketDescriptor {
            src,
            dst,
            protocol: Protocol::Other(proto),
            src_port: 0,
            dst_port: 0,
            payload_len: 0,
            seq: None,
            app_payload: false,
            ts: Duration::default(),
        }
    }

    /// Set the capture timestamp
    pub fn with_ts(self, ts: Duration) -> Self {
        PacketDescriptor { ts, ..self }
    }
}

impl fmt::Display for PacketDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} [{}]:{} -> [{}]:{} len={}",
            self.protocol, self.src, self.src_port, self.dst, self.dst_port, self.payload_len
        )?;
        if let Some(seq) = self.seq {
            write!(f, " seq={seq}")?;
        }
        Ok(())
    }
}
