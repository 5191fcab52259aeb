//! Frame classification: extract a `PacketDescriptor` from IPv4/TCP/UDP headers

use crate::descriptor::PacketDescriptor;
use crate::frame::Frame;
use pnet_packet::ethernet::EtherTypes;
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::Ipv4Packet;
use pnet_packet::tcp::TcpPacket;
use pnet_packet::udp::UdpPacket;
use serde::Serialize;
use std::cmp::min;
use std::fmt;
use std::net::IpAddr;

const IPV4_MIN_HEADER_LEN: usize = 20;
const TCP_MIN_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// Reason for excluding a frame from descriptor emission
///
/// Skips are not errors: the frame is silently left out of the statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    /// The frame has no decodable network layer
    UnsupportedLink,
    /// The network layer is not IPv4
    NotIpv4,
    /// An IPv4, TCP or UDP header is shorter than announced
    TruncatedHeader,
    /// Non-first IPv4 fragment, without transport header
    Fragment,
}

impl fmt::Display for Skip {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Skip::UnsupportedLink => "unsupported link layer",
            Skip::NotIpv4 => "not IPv4",
            Skip::TruncatedHeader => "truncated header",
            Skip::Fragment => "IPv4 fragment",
        };
        f.write_str(s)
    }
}

/// Classification counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ClassifierStats {
    pub accepted: u64,
    pub unsupported_link: u64,
    pub not_ipv4: u64,
    pub truncated: u64,
    pub fragments: u64,
}

impl ClassifierStats {
    pub fn skipped(&self) -> u64 {
        self.unsupported_link + self.not_ipv4 + self.truncated + self.fragments
    }
}

/// Converts captured frames into packet descriptors
#[derive(Default)]
pub struct FrameClassifier {
    stats: ClassifierStats,
}

impl FrameClassifier {
    pub fn new() -> Self {
        FrameClassifier::default()
    }

    /// Classify a frame, returning a descriptor or nothing
    pub fn classify(&mut self, frame: &Frame) -> Option<PacketDescriptor> {
        self.try_classify(frame).ok()
    }

    /// Classify a frame, returning a descriptor or the reason for skipping it
    pub fn try_classify(&mut self, frame: &Frame) -> Result<PacketDescriptor, Skip> {
        let res = classify_frame(frame);
        match res {
            Ok(ref d) => {
                trace!("frame {}: {}", frame.index, d);
                self.stats.accepted += 1;
            }
            Err(skip) => {
                trace!("frame {}: skipped ({})", frame.index, skip);
                match skip {
                    Skip::UnsupportedLink => self.stats.unsupported_link += 1,
                    Skip::NotIpv4 => self.stats.not_ipv4 += 1,
                    Skip::TruncatedHeader => self.stats.truncated += 1,
                    Skip::Fragment => self.stats.fragments += 1,
                }
            }
        }
        res
    }

    pub fn stats(&self) -> &ClassifierStats {
        &self.stats
    }
}

fn classify_frame(frame: &Frame) -> Result<PacketDescriptor, Skip> {
    let (ethertype, data) = frame.network_layer().ok_or(Skip::UnsupportedLink)?;
    if ethertype != EtherTypes::Ipv4.0 {
        return Err(Skip::NotIpv4);
    }
    let (ipv4, l4_data) = ipv4_layer(data)?;
    let src = IpAddr::V4(ipv4.get_source());
    let dst = IpAddr::V4(ipv4.get_destination());
    let proto = ipv4.get_next_level_protocol();

    let descriptor = match proto {
        IpNextHeaderProtocols::Tcp => {
            if l4_data.len() < TCP_MIN_HEADER_LEN {
                return Err(Skip::TruncatedHeader);
            }
            let tcp = TcpPacket::new(l4_data).ok_or(Skip::TruncatedHeader)?;
            let header_len = usize::from(tcp.get_data_offset()) * 4;
            if header_len < TCP_MIN_HEADER_LEN || header_len > l4_data.len() {
                return Err(Skip::TruncatedHeader);
            }
            PacketDescriptor::tcp(
                src,
                dst,
                tcp.get_source(),
                tcp.get_destination(),
                tcp.get_sequence(),
                l4_data.len() - header_len,
            )
        }
        IpNextHeaderProtocols::Udp => {
            let udp = UdpPacket::new(l4_data).ok_or(Skip::TruncatedHeader)?;
            // trust the UDP length only if consistent with the IP payload
            let udp_len = usize::from(udp.get_length());
            let end = if udp_len >= UDP_HEADER_LEN {
                min(udp_len, l4_data.len())
            } else {
                l4_data.len()
            };
            PacketDescriptor::udp(
                src,
                dst,
                udp.get_source(),
                udp.get_destination(),
                end - UDP_HEADER_LEN,
            )
        }
        p => PacketDescriptor::other(src, dst, p.0),
    };
    Ok(descriptor.with_ts(frame.ts))
}

/// Validate the IPv4 header and return it, with the transport layer bytes
fn ipv4_layer(data: &[u8]) -> Result<(Ipv4Packet<'_>, &[u8]), Skip> {
    let ipv4 = Ipv4Packet::new(data).ok_or(Skip::TruncatedHeader)?;
    if ipv4.get_version() != 4 {
        return Err(Skip::NotIpv4);
    }
    let header_len = usize::from(ipv4.get_header_length()) * 4;
    if header_len < IPV4_MIN_HEADER_LEN || header_len > data.len() {
        return Err(Skip::TruncatedHeader);
    }
    if ipv4.get_fragment_offset() != 0 {
        return Err(Skip::Fragment);
    }
    // total length bounds the transport layer (removes ethernet padding);
    // a capture shorter than announced keeps what was captured
    let total_len = usize::from(ipv4.get_total_length());
    let end = if total_len >= header_len {
        min(total_len, data.len())
    } else {
        data.len()
    };
    Ok((ipv4, &data[header_len..end]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Protocol;
    use crate::Duration;
    use pcap_parser::data::PacketData;
    use pnet_packet::ip::IpNextHeaderProtocol;
    use pnet_packet::ipv4::MutableIpv4Packet;
    use pnet_packet::tcp::MutableTcpPacket;
    use pnet_packet::udp::MutableUdpPacket;
    use std::net::Ipv4Addr;

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn ipv4(proto: IpNextHeaderProtocol, l4: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; IPV4_MIN_HEADER_LEN + l4.len()];
        {
            let mut ip = MutableIpv4Packet::new(&mut buf).expect("buffer size");
            ip.set_version(4);
            ip.set_header_length(5);
            ip.set_total_length((IPV4_MIN_HEADER_LEN + l4.len()) as u16);
            ip.set_ttl(64);
            ip.set_next_level_protocol(proto);
            ip.set_source(SRC);
            ip.set_destination(DST);
        }
        buf[IPV4_MIN_HEADER_LEN..].copy_from_slice(l4);
        buf
    }

    fn tcp(sport: u16, dport: u16, seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; TCP_MIN_HEADER_LEN + payload.len()];
        {
            let mut tcp = MutableTcpPacket::new(&mut buf).expect("buffer size");
            tcp.set_source(sport);
            tcp.set_destination(dport);
            tcp.set_sequence(seq);
            tcp.set_data_offset(5);
        }
        buf[TCP_MIN_HEADER_LEN..].copy_from_slice(payload);
        ipv4(IpNextHeaderProtocols::Tcp, &buf)
    }

    fn udp(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; UDP_HEADER_LEN + payload.len()];
        {
            let mut udp = MutableUdpPacket::new(&mut buf).expect("buffer size");
            udp.set_source(sport);
            udp.set_destination(dport);
            udp.set_length((UDP_HEADER_LEN + payload.len()) as u16);
        }
        buf[UDP_HEADER_LEN..].copy_from_slice(payload);
        ipv4(IpNextHeaderProtocols::Udp, &buf)
    }

    fn l3_frame(ethertype: u16, data: &[u8]) -> Frame<'_> {
        Frame {
            ts: Duration::new(1_700_000_000, 42),
            data: PacketData::L3(ethertype, data),
            caplen: data.len() as u32,
            origlen: data.len() as u32,
            index: 1,
        }
    }

    #[test]
    fn classify_tcp() {
        let data = tcp(40000, 443, 1000, b"hello");
        let mut classifier = FrameClassifier::new();
        let d = classifier
            .classify(&l3_frame(0x0800, &data))
            .expect("tcp descriptor");
        assert_eq!(d.protocol, Protocol::Tcp);
        assert_eq!(d.src, IpAddr::V4(SRC));
        assert_eq!(d.dst, IpAddr::V4(DST));
        assert_eq!((d.src_port, d.dst_port), (40000, 443));
        assert_eq!(d.seq, Some(1000));
        assert_eq!(d.payload_len, 5);
        assert!(d.app_payload);
        assert_eq!(d.ts, Duration::new(1_700_000_000, 42));
        assert_eq!(classifier.stats().accepted, 1);
    }

    #[test]
    fn classify_tcp_without_payload() {
        let data = tcp(40000, 443, 7, b"");
        let d = FrameClassifier::new()
            .classify(&l3_frame(0x0800, &data))
            .expect("tcp descriptor");
        assert_eq!(d.payload_len, 0);
        assert!(!d.app_payload);
    }

    #[test]
    fn classify_udp() {
        let data = udp(5353, 53, b"query");
        let d = FrameClassifier::new()
            .classify(&l3_frame(0x0800, &data))
            .expect("udp descriptor");
        assert_eq!(d.protocol, Protocol::Udp);
        assert_eq!((d.src_port, d.dst_port), (5353, 53));
        assert_eq!(d.payload_len, 5);
        assert_eq!(d.seq, None);
    }

    #[test]
    fn classify_other_protocol() {
        let data = ipv4(IpNextHeaderProtocols::Icmp, &[8, 0, 0, 0, 0, 0, 0, 0]);
        let d = FrameClassifier::new()
            .classify(&l3_frame(0x0800, &data))
            .expect("descriptor");
        assert_eq!(d.protocol, Protocol::Other(1));
        assert_eq!((d.src_port, d.dst_port), (0, 0));
        assert_eq!(d.seq, None);
        assert_eq!(d.payload_len, 0);
    }

    #[test]
    fn classify_ignores_ethernet_padding() {
        let mut data = udp(1, 2, b"abc");
        data.extend_from_slice(&[0u8; 10]);
        let d = FrameClassifier::new()
            .classify(&l3_frame(0x0800, &data))
            .expect("udp descriptor");
        assert_eq!(d.payload_len, 3);
    }

    #[test]
    fn classify_skips() {
        let mut classifier = FrameClassifier::new();

        let ipv6 = [0x60u8; 40];
        assert_eq!(classifier.try_classify(&l3_frame(0x86dd, &ipv6)), Err(Skip::NotIpv4));

        let short = [0x45u8; 12];
        assert_eq!(
            classifier.try_classify(&l3_frame(0x0800, &short)),
            Err(Skip::TruncatedHeader)
        );

        // TCP announced, header cut after 10 bytes
        let mut cut = tcp(1, 2, 3, b"");
        cut.truncate(IPV4_MIN_HEADER_LEN + 10);
        cut[2..4].copy_from_slice(&((IPV4_MIN_HEADER_LEN + 10) as u16).to_be_bytes());
        assert_eq!(
            classifier.try_classify(&l3_frame(0x0800, &cut)),
            Err(Skip::TruncatedHeader)
        );

        let mut fragment = udp(1, 2, b"abc");
        fragment[6..8].copy_from_slice(&0x0010u16.to_be_bytes());
        assert_eq!(
            classifier.try_classify(&l3_frame(0x0800, &fragment)),
            Err(Skip::Fragment)
        );

        let raw = [0u8; 4];
        let frame = Frame {
            ts: Duration::default(),
            data: PacketData::Unsupported(&raw),
            caplen: 4,
            origlen: 4,
            index: 5,
        };
        assert_eq!(classifier.classify(&frame), None);

        let stats = classifier.stats();
        assert_eq!(stats.accepted, 0);
        assert_eq!(stats.not_ipv4, 1);
        assert_eq!(stats.truncated, 2);
        assert_eq!(stats.fragments, 1);
        assert_eq!(stats.unsupported_link, 1);
        assert_eq!(stats.skipped(), 5);
    }
}
