//! Structured view over a captured Ethernet frame.
//!
//! `ParsedPacket::parse` walks Ethernet (with at most one 802.1Q tag), IPv4/IPv6 and
//! TCP/UDP headers and keeps the decoded addresses next to the captured frame bytes.
//! Upper layers that cannot be decoded are simply left empty.

use bytes::Bytes;
use pnet::datalink::MacAddr;
use pnet::packet::Packet;
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::packet::vlan::VlanPacket;
use std::fmt::{Display, Formatter};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::ops::Range;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const VLAN_HEADER_LEN: usize = 4;
pub const IPV4_HEADER_LEN: usize = 20;
pub const IPV6_HEADER_LEN: usize = 40;
pub const TCP_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMetadata {
    pub datalink_metadata: DataLinkMetadata,
    pub ip_metadata: Option<IpMetadata>,
    pub transport_metadata: Option<PortMetadata>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataLinkMetadata {
    pub src_mac: MacAddr,
    pub dst_mac: MacAddr,
    pub ethertype: EtherType,
    pub vlan_id: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpMetadata {
    Ipv4(Ipv4Metadata),
    Ipv6(Ipv6Metadata),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Metadata {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv6Metadata {
    pub src_ip: Ipv6Addr,
    pub dst_ip: Ipv6Addr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMetadata {
    pub protocol: TransportProtocol,
    pub src_port: u16,
    pub dst_port: u16,
}

impl Display for IpMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            IpMetadata::Ipv4(ip) => write!(f, "{} -> {}", ip.src_ip, ip.dst_ip),
            IpMetadata::Ipv6(ip) => write!(f, "{} -> {}", ip.src_ip, ip.dst_ip),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    data: Bytes,
    metadata: PacketMetadata,
    application: Option<Range<usize>>,
}

struct UpperLayers {
    ip_metadata: Option<IpMetadata>,
    transport_metadata: Option<PortMetadata>,
    application: Option<Range<usize>>,
}

impl UpperLayers {
    fn empty() -> Self {
        Self {
            ip_metadata: None,
            transport_metadata: None,
            application: None,
        }
    }
}

impl ParsedPacket {
    /// Returns `None` when `data` is too short to hold an Ethernet header.
    pub fn parse(data: Bytes) -> Option<Self> {
        let ethernet = EthernetPacket::new(&data)?;
        let mut ethertype = ethernet.get_ethertype();
        let mut datalink_metadata = DataLinkMetadata {
            src_mac: ethernet.get_source(),
            dst_mac: ethernet.get_destination(),
            ethertype,
            vlan_id: None,
        };
        let mut offset = ETHERNET_HEADER_LEN;

        if ethertype == EtherTypes::Vlan {
            if let Some(vlan) = VlanPacket::new(&data[offset..]) {
                datalink_metadata.vlan_id = Some(vlan.get_vlan_identifier());
                ethertype = vlan.get_ethertype();
                datalink_metadata.ethertype = ethertype;
                offset += VLAN_HEADER_LEN;
            }
        }

        let upper = match ethertype {
            EtherTypes::Ipv4 => parse_ipv4(&data, offset),
            EtherTypes::Ipv6 => parse_ipv6(&data, offset),
            _ => UpperLayers::empty(),
        };

        Some(Self {
            metadata: PacketMetadata {
                datalink_metadata,
                ip_metadata: upper.ip_metadata,
                transport_metadata: upper.transport_metadata,
            },
            application: upper.application,
            data,
        })
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn metadata(&self) -> &PacketMetadata {
        &self.metadata
    }

    /// Transport payload, excluding any Ethernet padding. `None` without a transport layer.
    pub fn application_payload(&self) -> Option<&[u8]> {
        self.application.clone().map(|range| &self.data[range])
    }
}

impl Display for ParsedPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let datalink = &self.metadata.datalink_metadata;
        write!(
            f,
            "{} bytes; {} -> {} ({})",
            self.data.len(),
            datalink.src_mac,
            datalink.dst_mac,
            datalink.ethertype
        )?;
        if let Some(vlan_id) = datalink.vlan_id {
            write!(f, "; vlan {vlan_id}")?;
        }
        if let Some(ip) = &self.metadata.ip_metadata {
            write!(f, "; {ip}")?;
        }
        if let Some(port) = &self.metadata.transport_metadata {
            write!(
                f,
                "; {:?} {} -> {}",
                port.protocol, port.src_port, port.dst_port
            )?;
        }
        if let Some(payload) = self.application_payload() {
            write!(f, "; payload {} bytes", payload.len())?;
        }
        Ok(())
    }
}

fn parse_ipv4(data: &[u8], offset: usize) -> UpperLayers {
    let Some(ipv4) = Ipv4Packet::new(&data[offset..]) else {
        return UpperLayers::empty();
    };
    let ip_metadata = Some(IpMetadata::Ipv4(Ipv4Metadata {
        src_ip: ipv4.get_source(),
        dst_ip: ipv4.get_destination(),
    }));
    let header_len = ipv4.get_header_length() as usize * 4;
    let total_len = (ipv4.get_total_length() as usize).min(data.len() - offset);
    if header_len < IPV4_HEADER_LEN || header_len > total_len {
        return UpperLayers {
            ip_metadata,
            ..UpperLayers::empty()
        };
    }
    let (transport_metadata, application) = parse_transport(
        ipv4.get_next_level_protocol(),
        data,
        offset + header_len..offset + total_len,
    );
    UpperLayers {
        ip_metadata,
        transport_metadata,
        application,
    }
}

fn parse_ipv6(data: &[u8], offset: usize) -> UpperLayers {
    let Some(ipv6) = Ipv6Packet::new(&data[offset..]) else {
        return UpperLayers::empty();
    };
    let ip_metadata = Some(IpMetadata::Ipv6(Ipv6Metadata {
        src_ip: ipv6.get_source(),
        dst_ip: ipv6.get_destination(),
    }));
    let start = offset + IPV6_HEADER_LEN;
    let end = (start + ipv6.get_payload_length() as usize).min(data.len());
    let (transport_metadata, application) =
        parse_transport(ipv6.get_next_header(), data, start..end);
    UpperLayers {
        ip_metadata,
        transport_metadata,
        application,
    }
}

fn parse_transport(
    protocol: IpNextHeaderProtocol,
    data: &[u8],
    segment: Range<usize>,
) -> (Option<PortMetadata>, Option<Range<usize>>) {
    match protocol {
        IpNextHeaderProtocols::Tcp => {
            let Some(tcp) = TcpPacket::new(&data[segment.clone()]) else {
                return (None, None);
            };
            let header_len = tcp.get_data_offset() as usize * 4;
            if header_len < TCP_HEADER_LEN || segment.start + header_len > segment.end {
                return (None, None);
            }
            (
                Some(PortMetadata {
                    protocol: TransportProtocol::Tcp,
                    src_port: tcp.get_source(),
                    dst_port: tcp.get_destination(),
                }),
                Some(segment.start + header_len..segment.end),
            )
        }
        IpNextHeaderProtocols::Udp => {
            let Some(udp) = UdpPacket::new(&data[segment.clone()]) else {
                return (None, None);
            };
            let end = (segment.start + udp.get_length() as usize)
                .clamp(segment.start + UDP_HEADER_LEN, segment.end);
            (
                Some(PortMetadata {
                    protocol: TransportProtocol::Udp,
                    src_port: udp.get_source(),
                    dst_port: udp.get_destination(),
                }),
                Some(segment.start + UDP_HEADER_LEN..end),
            )
        }
        _ => (None, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udp_frame(payload: &[u8], padding: usize) -> Vec<u8> {
        let udp_len = UDP_HEADER_LEN + payload.len();
        let ip_len = IPV4_HEADER_LEN + udp_len;
        let mut frame = vec![0u8; ETHERNET_HEADER_LEN + ip_len + padding];
        frame[12..14].copy_from_slice(&[0x08, 0x00]);
        let ip = &mut frame[ETHERNET_HEADER_LEN..];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(ip_len as u16).to_be_bytes());
        ip[9] = 17;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);
        let udp = &mut ip[IPV4_HEADER_LEN..];
        udp[0..2].copy_from_slice(&5353u16.to_be_bytes());
        udp[2..4].copy_from_slice(&5354u16.to_be_bytes());
        udp[4..6].copy_from_slice(&(udp_len as u16).to_be_bytes());
        udp[UDP_HEADER_LEN..UDP_HEADER_LEN + payload.len()].copy_from_slice(payload);
        frame
    }

    #[test]
    fn short_frames_do_not_parse() {
        assert!(ParsedPacket::parse(Bytes::new()).is_none());
        assert!(ParsedPacket::parse(Bytes::from_static(&[1u8; 13])).is_none());
    }

    #[test]
    fn udp_payload_excludes_ethernet_padding() {
        let packet = ParsedPacket::parse(Bytes::from(udp_frame(b"hi", 16))).unwrap();
        assert_eq!(packet.application_payload(), Some(&b"hi"[..]));
        assert_eq!(
            packet.metadata().transport_metadata,
            Some(PortMetadata {
                protocol: TransportProtocol::Udp,
                src_port: 5353,
                dst_port: 5354,
            })
        );
        assert_eq!(
            packet.metadata().ip_metadata,
            Some(IpMetadata::Ipv4(Ipv4Metadata {
                src_ip: Ipv4Addr::new(10, 0, 0, 1),
                dst_ip: Ipv4Addr::new(10, 0, 0, 2),
            }))
        );
    }

    #[test]
    fn unknown_ethertype_keeps_only_datalink() {
        let mut frame = vec![0u8; 64];
        frame[12..14].copy_from_slice(&[0x88, 0xcc]);
        let packet = ParsedPacket::parse(Bytes::from(frame)).unwrap();
        assert_eq!(packet.metadata().ip_metadata, None);
        assert_eq!(packet.application_payload(), None);
        assert_eq!(packet.data().len(), 64);
    }
}
