//! Adapter that fabricates TCP packets on request, used to exercise pipelines
//! without a capture device.

use crate::adapter::Adapter;
use crate::common::{Common, Component};
use crate::error::{CoreError, CoreErrorKind};
use crate::item::{ITEM_TYPE_PACKET, ITEM_TYPE_RAW_PACKET, Item, Message};
use crate::launch::{ItemReceiver, finish, launch};
use crate::metadata::{ETHERNET_HEADER_LEN, IPV4_HEADER_LEN, ParsedPacket, TCP_HEADER_LEN};
use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use pnet::datalink::MacAddr;
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::tcp::{self, MutableTcpPacket, TcpFlags};
use pnet::packet::MutablePacket;
use std::net::Ipv4Addr;

pub const SOURCE_MAC: MacAddr = MacAddr(0xff, 0xaa, 0xfa, 0xaa, 0xff, 0xaa);
pub const DESTINATION_MAC: MacAddr = MacAddr(0xbd, 0xbd, 0xbd, 0xbd, 0xbd, 0xbd);
pub const SOURCE_IP: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
pub const DESTINATION_IP: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);
pub const SOURCE_PORT: u16 = 1234;
pub const DESTINATION_PORT: u16 = 80;
pub const SEQUENCE: u32 = 11050;

/// Builds an Ethernet/IPv4/TCP frame carrying `payload`.
pub fn generate_packet(payload: &[u8]) -> Result<Bytes, CoreError> {
    let ip_len = IPV4_HEADER_LEN + TCP_HEADER_LEN + payload.len();
    let total_length = u16::try_from(ip_len).map_err(|_| {
        CoreError::new(
            CoreErrorKind::PacketConstructionError,
            &format!("payload of {} bytes does not fit an IPv4 packet", payload.len()),
        )
    })?;
    let error = |layer: &str| {
        CoreError::new(
            CoreErrorKind::PacketConstructionError,
            &format!("buffer too small for the {layer} header"),
        )
    };

    let mut buffer = vec![0u8; ETHERNET_HEADER_LEN + ip_len];
    {
        let mut ethernet = MutableEthernetPacket::new(&mut buffer).ok_or_else(|| error("ethernet"))?;
        ethernet.set_source(SOURCE_MAC);
        ethernet.set_destination(DESTINATION_MAC);
        ethernet.set_ethertype(EtherTypes::Ipv4);
    }
    {
        let mut ip = MutableIpv4Packet::new(&mut buffer[ETHERNET_HEADER_LEN..])
            .ok_or_else(|| error("ipv4"))?;
        ip.set_version(4);
        ip.set_header_length((IPV4_HEADER_LEN / 4) as u8);
        ip.set_total_length(total_length);
        ip.set_ttl(64);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
        ip.set_source(SOURCE_IP);
        ip.set_destination(DESTINATION_IP);
        let checksum = ipv4::checksum(&ip.to_immutable());
        ip.set_checksum(checksum);
    }
    {
        let mut tcp = MutableTcpPacket::new(&mut buffer[ETHERNET_HEADER_LEN + IPV4_HEADER_LEN..])
            .ok_or_else(|| error("tcp"))?;
        tcp.set_source(SOURCE_PORT);
        tcp.set_destination(DESTINATION_PORT);
        tcp.set_sequence(SEQUENCE);
        tcp.set_data_offset((TCP_HEADER_LEN / 4) as u8);
        tcp.set_flags(TcpFlags::RST);
        tcp.set_window(1024);
        tcp.payload_mut().copy_from_slice(payload);
        let checksum = tcp::ipv4_checksum(&tcp.to_immutable(), &SOURCE_IP, &DESTINATION_IP);
        tcp.set_checksum(checksum);
    }
    Ok(Bytes::from(buffer))
}

/// Whether `item` is a generated packet carrying `payload`.
pub fn check_packet(item: &Item, payload: &[u8]) -> bool {
    let packet = match item {
        Item::Parsed(packet) => packet.clone(),
        Item::Raw(raw) => match ParsedPacket::parse(raw.payload.clone()) {
            Some(packet) => packet,
            None => return false,
        },
        Item::Status(_) => return false,
    };
    let transport = packet.metadata().transport_metadata;
    transport.is_some_and(|t| t.src_port == SOURCE_PORT && t.dst_port == DESTINATION_PORT)
        && packet.application_payload() == Some(payload)
}

/// Reader turns each control item tagged `packet` or `rawpacket` into a generated
/// frame carrying that item's payload. Writer forwards its input to the completion
/// channel ahead of the terminal status.
#[derive(Debug, Clone)]
pub struct GeneratorAdapter {
    common: Common,
}

impl Default for GeneratorAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorAdapter {
    pub fn new() -> Self {
        Self {
            common: Common::new("generator"),
        }
    }
}

impl Component for GeneratorAdapter {
    fn common(&self) -> &Common {
        &self.common
    }
}

#[async_trait]
impl Adapter for GeneratorAdapter {
    async fn read(
        &self,
        mut control: ItemReceiver,
        _message: Message,
    ) -> Result<ItemReceiver, CoreError> {
        Ok(launch(&self.common, |out| async move {
            while let Some(request) = control.recv().await {
                let frame = match request.tag() {
                    ITEM_TYPE_PACKET | ITEM_TYPE_RAW_PACKET => generate_packet(request.payload())?,
                    tag => {
                        debug!("Ignoring control item tagged {tag:?}");
                        continue;
                    }
                };
                let item = if request.tag() == ITEM_TYPE_PACKET {
                    ParsedPacket::parse(frame.clone())
                        .map(Item::Parsed)
                        .unwrap_or_else(|| Item::raw(ITEM_TYPE_RAW_PACKET, frame))
                } else {
                    Item::raw(ITEM_TYPE_RAW_PACKET, frame)
                };
                if out.send(item).await.is_err() {
                    return Ok(());
                }
            }
            Err(CoreError::interrupted())
        }))
    }

    async fn write(
        &self,
        mut input: ItemReceiver,
        _message: Message,
    ) -> Result<ItemReceiver, CoreError> {
        Ok(launch(&self.common, |done| async move {
            let mut result = Ok(());
            while let Some(item) = input.recv().await {
                if done.send(item).await.is_err() {
                    result = Err(CoreError::input_closed());
                    break;
                }
            }
            finish(&done, result).await
        }))
    }
}
