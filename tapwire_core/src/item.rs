use crate::error::CoreError;
use crate::metadata::ParsedPacket;
use bytes::Bytes;
use std::any::Any;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

pub const ITEM_TYPE_UNKNOWN: &str = "unknown";
pub const ITEM_TYPE_RAW_PACKET: &str = "rawpacket";
pub const ITEM_TYPE_PACKET: &str = "packet";
pub const ITEM_TYPE_MESSAGE: &str = "message";

pub const CLOSED_TEXT: &str = "channel closed. done";

/// Per-call context handed to every stage. Currently always `None`.
pub type Message = Option<Arc<dyn Any + Send + Sync>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawItem {
    pub tag: String,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Closed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusItem {
    pub kind: StatusKind,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Raw(RawItem),
    Parsed(ParsedPacket),
    Status(StatusItem),
}

impl Item {
    pub fn raw(tag: &str, payload: impl Into<Bytes>) -> Self {
        Item::Raw(RawItem {
            tag: tag.to_owned(),
            payload: payload.into(),
        })
    }

    pub fn packet(packet: ParsedPacket) -> Self {
        Item::Parsed(packet)
    }

    /// End-of-stream marker emitted by a writer once its input is drained.
    pub fn closed() -> Self {
        Item::Status(StatusItem {
            kind: StatusKind::Closed,
            payload: Bytes::from_static(CLOSED_TEXT.as_bytes()),
        })
    }

    /// Marker emitted by a writer that stopped on `error` before its input closed.
    pub fn aborted(error: &CoreError) -> Self {
        Item::Status(StatusItem {
            kind: StatusKind::Aborted,
            payload: Bytes::from(error.to_string()),
        })
    }

    /// Interprets bytes received from the wire as an Ethernet frame, falling back to
    /// an untyped item when they do not parse.
    pub fn from_wire(payload: Bytes) -> Self {
        match ParsedPacket::parse(payload.clone()) {
            Some(packet) => Item::Parsed(packet),
            None => Item::raw(ITEM_TYPE_UNKNOWN, payload),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Item::Raw(raw) => raw.tag.as_str(),
            Item::Parsed(_) => ITEM_TYPE_PACKET,
            Item::Status(_) => ITEM_TYPE_MESSAGE,
        }
    }

    pub fn payload(&self) -> &Bytes {
        match self {
            Item::Raw(raw) => &raw.payload,
            Item::Parsed(packet) => packet.data(),
            Item::Status(status) => &status.payload,
        }
    }

    pub fn is_status(&self) -> bool {
        matches!(self, Item::Status(_))
    }

    pub fn as_packet(&self) -> Option<&ParsedPacket> {
        match self {
            Item::Parsed(packet) => Some(packet),
            _ => None,
        }
    }

    /// Parses a raw item into a structured packet. Status items and frames that do
    /// not parse are handed back unchanged in `Err`.
    pub fn into_packet(self) -> Result<ParsedPacket, Item> {
        match self {
            Item::Parsed(packet) => Ok(packet),
            Item::Raw(raw) => match ParsedPacket::parse(raw.payload.clone()) {
                Some(packet) => Ok(packet),
                None => Err(Item::Raw(raw)),
            },
            status => Err(status),
        }
    }
}

impl Display for Item {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Item::Raw(raw) => write!(f, "[{}] {} bytes", raw.tag, raw.payload.len()),
            Item::Parsed(packet) => write!(f, "[{ITEM_TYPE_PACKET}] {packet}"),
            Item::Status(status) => write!(
                f,
                "[{ITEM_TYPE_MESSAGE}] {:?}: {}",
                status.kind,
                String::from_utf8_lossy(&status.payload)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreErrorKind;

    #[test]
    fn tags_follow_variants() {
        assert_eq!(Item::raw("", Bytes::new()).tag(), "");
        assert_eq!(Item::closed().tag(), ITEM_TYPE_MESSAGE);
        assert_eq!(&Item::closed().payload()[..], CLOSED_TEXT.as_bytes());
    }

    #[test]
    fn short_wire_bytes_stay_unknown() {
        let item = Item::from_wire(Bytes::from_static(b"TD2"));
        assert_eq!(item.tag(), ITEM_TYPE_UNKNOWN);
        assert_eq!(&item.payload()[..], b"TD2");
        assert!(item.clone().into_packet().is_err());
    }

    #[test]
    fn aborted_carries_error_text() {
        let error = CoreError::new(CoreErrorKind::WriteError, "broken pipe");
        let item = Item::aborted(&error);
        assert!(item.is_status());
        assert_eq!(&item.payload()[..], error.to_string().as_bytes());
        assert_ne!(item, Item::closed());
    }
}
