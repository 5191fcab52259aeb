use crate::duration::Duration;
use pcap_parser::data::PacketData;
use pnet_packet::ethernet::{EtherTypes, EthernetPacket};
use pnet_packet::vlan::VlanPacket;

const ETHERNET_HEADER_LEN: usize = 14;
const VLAN_HEADER_LEN: usize = 4;
/// 802.1ad outer tag
const ETHERTYPE_QINQ: u16 = 0x88a8;
const MAX_VLAN_TAGS: usize = 2;

/// One captured frame, as delivered by a frame source
///
/// The layer data borrows the capture buffer and is only valid for the
/// duration of the `FrameAnalyzer::handle_frame` call.
pub struct Frame<'a> {
    /// Capture timestamp
    pub ts: Duration,
    /// Frame contents, decoded to the first layer known for the link type
    pub data: PacketData<'a>,
    /// Number of bytes captured
    pub caplen: u32,
    /// Length of the frame on the wire
    pub origlen: u32,
    /// Index of the frame in the capture session, starting at 1
    pub index: usize,
}

impl<'a> Frame<'a> {
    /// Return the network layer of the frame: ethertype and layer 3 bytes.
    ///
    /// Ethernet frames are unwrapped, including up to two VLAN tags.
    /// Returns `None` if the frame has no network layer, or if the link
    /// layer is truncated.
    pub fn network_layer(&self) -> Option<(u16, &'a [u8])> {
        match self.data {
            PacketData::L2(data) => {
                // resize slice to remove padding
                let datalen = std::cmp::min(self.caplen as usize, data.len());
                ethernet_payload(&data[..datalen])
            }
            PacketData::L3(ethertype, data) => Some((ethertype, data)),
            PacketData::L4(_, _) | PacketData::Unsupported(_) => None,
        }
    }
}

fn ethernet_payload(data: &[u8]) -> Option<(u16, &[u8])> {
    let eth = EthernetPacket::new(data)?;
    let mut ethertype = eth.get_ethertype();
    let mut offset = ETHERNET_HEADER_LEN;
    for _ in 0..MAX_VLAN_TAGS {
        if ethertype != EtherTypes::Vlan && ethertype.0 != ETHERTYPE_QINQ {
            break;
        }
        let vlan = VlanPacket::new(data.get(offset..)?)?;
        trace!("    vlan: {}", vlan.get_vlan_identifier());
        ethertype = vlan.get_ethertype();
        offset += VLAN_HEADER_LEN;
    }
    Some((ethertype.0, data.get(offset..)?))
}
