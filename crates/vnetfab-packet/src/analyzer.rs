//! Best-effort L2/L3/L4 context extraction for a raw Ethernet frame.
//!
//! The bandwidth shaper and the NIO filter chain both need to know "is this
//! TCP/UDP, and to which port" without committing to a full protocol stack;
//! this module walks just far enough to answer that, bailing out to
//! `EtherType::Other`/`None` the moment a header doesn't look like what it
//! claims to be.

use crate::endian::read_u16_be;

const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_ARP: u16 = 0x0806;

const IP_PROTO_TCP: u8 = 6;
const IP_PROTO_UDP: u8 = 17;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Ipv6,
    Arp,
    Other(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Protocol {
    Tcp,
    Udp,
    Other(u8),
}

/// Best-effort summary of a frame's headers. Any layer that doesn't parse
/// cleanly (truncated, unrecognized) is simply absent rather than an error:
/// the analyzer is advisory, not a validating parser.
#[derive(Debug, Clone, Default)]
pub struct PacketInfo {
    pub src_mac: Option<[u8; 6]>,
    pub dst_mac: Option<[u8; 6]>,
    pub vlan_id: Option<u16>,
    pub ethertype: Option<EtherType>,
    pub src_addr: Option<IpAddrBytes>,
    pub dst_addr: Option<IpAddrBytes>,
    pub l4: Option<L4Protocol>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpAddrBytes {
    V4([u8; 4]),
    V6([u8; 16]),
}

/// Walks an Ethernet II frame (optionally single-tagged 802.1Q), then an
/// IPv4 or IPv6 header, then a TCP/UDP header if present, filling in as
/// much of [`PacketInfo`] as the bytes support.
pub fn analyze(frame: &[u8]) -> PacketInfo {
    let mut info = PacketInfo::default();

    if frame.len() < 14 {
        return info;
    }
    info.dst_mac = Some(frame[0..6].try_into().unwrap());
    info.src_mac = Some(frame[6..12].try_into().unwrap());

    let mut offset = 12;
    let mut ethertype = read_u16_be(&frame[offset..]);
    offset += 2;

    if ethertype == ETHERTYPE_VLAN {
        if frame.len() < offset + 4 {
            return info;
        }
        let tci = read_u16_be(&frame[offset..]);
        info.vlan_id = Some(tci & 0x0FFF);
        offset += 2;
        ethertype = read_u16_be(&frame[offset..]);
        offset += 2;
    }

    info.ethertype = Some(match ethertype {
        ETHERTYPE_IPV4 => EtherType::Ipv4,
        ETHERTYPE_IPV6 => EtherType::Ipv6,
        ETHERTYPE_ARP => EtherType::Arp,
        other => EtherType::Other(other),
    });

    match info.ethertype {
        Some(EtherType::Ipv4) => analyze_ipv4(frame, offset, &mut info),
        Some(EtherType::Ipv6) => analyze_ipv6(frame, offset, &mut info),
        _ => {}
    }

    info
}

fn analyze_ipv4(frame: &[u8], offset: usize, info: &mut PacketInfo) {
    if frame.len() < offset + 20 {
        return;
    }
    let header = &frame[offset..];
    let version = header[0] >> 4;
    if version != 4 {
        return;
    }
    let ihl = (header[0] & 0x0F) as usize * 4;
    if ihl < 20 || frame.len() < offset + ihl {
        return;
    }
    let protocol = header[9];
    info.src_addr = Some(IpAddrBytes::V4(header[12..16].try_into().unwrap()));
    info.dst_addr = Some(IpAddrBytes::V4(header[16..20].try_into().unwrap()));

    analyze_l4(frame, offset + ihl, protocol, info);
}

fn analyze_ipv6(frame: &[u8], offset: usize, info: &mut PacketInfo) {
    if frame.len() < offset + 40 {
        return;
    }
    let header = &frame[offset..];
    let version = header[0] >> 4;
    if version != 6 {
        return;
    }
    let next_header = header[6];
    info.src_addr = Some(IpAddrBytes::V6(header[8..24].try_into().unwrap()));
    info.dst_addr = Some(IpAddrBytes::V6(header[24..40].try_into().unwrap()));

    analyze_l4(frame, offset + 40, next_header, info);
}

fn analyze_l4(frame: &[u8], offset: usize, protocol: u8, info: &mut PacketInfo) {
    info.l4 = Some(match protocol {
        IP_PROTO_TCP => L4Protocol::Tcp,
        IP_PROTO_UDP => L4Protocol::Udp,
        other => L4Protocol::Other(other),
    });
    if !matches!(info.l4, Some(L4Protocol::Tcp) | Some(L4Protocol::Udp)) {
        return;
    }
    if frame.len() < offset + 4 {
        return;
    }
    info.src_port = Some(read_u16_be(&frame[offset..]));
    info.dst_port = Some(read_u16_be(&frame[offset + 2..]));
}
