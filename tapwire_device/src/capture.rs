use bytes::Bytes;
use log::info;
use pcap::{Active, Capture, Device, Inactive, Packet, PacketCodec};
use std::time::Duration;
use tapwire_core::error::{CoreError, CoreErrorKind};
use tapwire_core::item::{ITEM_TYPE_RAW_PACKET, Item};
use tapwire_core::metadata::ParsedPacket;

pub const DEFAULT_SNAPLEN: i32 = 1600;
pub const DEFAULT_PROMISCUOUS: bool = false;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_FILTER: &str = "ip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOptions {
    pub promiscuous: bool,
    pub snaplen: i32,
    pub timeout: Duration,
    pub filter: Option<String>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            promiscuous: DEFAULT_PROMISCUOUS,
            snaplen: DEFAULT_SNAPLEN,
            timeout: DEFAULT_TIMEOUT,
            filter: Some(DEFAULT_FILTER.to_owned()),
        }
    }
}

pub fn capture_error(error: pcap::Error) -> CoreError {
    CoreError::new(CoreErrorKind::CaptureError, error.to_string().as_str())
}

fn activation_error(device: &str, error: pcap::Error) -> CoreError {
    CoreError::new(
        CoreErrorKind::ActivationError,
        &format!("{device}: {error}"),
    )
}

/// Passive handle on `device`, resolved against the interfaces pcap can see.
pub fn open_inactive(device: &str) -> Result<Capture<Inactive>, CoreError> {
    let target = Device::list()
        .map_err(capture_error)?
        .into_iter()
        .find(|d| d.name == device)
        .ok_or(CoreError::new(
            CoreErrorKind::CaptureError,
            &format!("Capture device {device} not found"),
        ))?;
    Capture::from_device(target).map_err(|e| activation_error(device, e))
}

/// Applies `options` to the passive handle, opens it and installs the filter.
pub fn activate(
    device: &str,
    inactive: Capture<Inactive>,
    options: &CaptureOptions,
) -> Result<Capture<Active>, CoreError> {
    let timeout_ms = i32::try_from(options.timeout.as_millis()).unwrap_or(i32::MAX);
    let mut capture = inactive
        .promisc(options.promiscuous)
        .snaplen(options.snaplen)
        .timeout(timeout_ms)
        .immediate_mode(true)
        .open()
        .map_err(|e| activation_error(device, e))?;
    if let Some(filter) = &options.filter {
        capture
            .filter(filter, true)
            .map_err(|e| activation_error(device, e))?;
        info!("Filter applied on {device}: {filter}");
    }
    info!("Capture ready on {device}");
    Ok(capture)
}

pub fn list_devices() -> Result<Vec<Device>, CoreError> {
    Device::list().map_err(capture_error)
}

/// Turns each captured frame into an item, parsed when the headers decode.
pub struct ItemCodec;

impl PacketCodec for ItemCodec {
    type Item = Item;

    fn decode(&mut self, packet: Packet<'_>) -> Self::Item {
        let data = Bytes::copy_from_slice(packet.data);
        match ParsedPacket::parse(data.clone()) {
            Some(parsed) => Item::Parsed(parsed),
            None => Item::raw(ITEM_TYPE_RAW_PACKET, data),
        }
    }
}
