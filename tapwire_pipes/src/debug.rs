use log::{debug, info};
use tapwire_core::common::{Common, Component};
use tapwire_core::error::CoreError;
use tapwire_core::item::{ITEM_TYPE_RAW_PACKET, Item, Message};
use tapwire_core::launch::{ItemReceiver, launch};
use tapwire_core::pipe::{Mode, Pipe};

/// Inspection stage. `convert` parses captured frames and logs each packet,
/// `revert` logs the size of every item it forwards.
#[derive(Debug, Clone)]
pub struct DebugPipe {
    common: Common,
    mode: Mode,
}

impl DebugPipe {
    pub fn new(mode: Mode) -> Self {
        Self {
            common: Common::new("debug"),
            mode,
        }
    }
}

impl Component for DebugPipe {
    fn common(&self) -> &Common {
        &self.common
    }
}

impl Pipe for DebugPipe {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn convert(&self, mut input: ItemReceiver, _message: Message) -> Result<ItemReceiver, CoreError> {
        Ok(launch(&self.common, |out| async move {
            let (mut parsed, mut dropped) = (0usize, 0usize);
            while let Some(item) = input.recv().await {
                let item = if item.tag() == ITEM_TYPE_RAW_PACKET {
                    match item.into_packet() {
                        Ok(packet) => Item::Parsed(packet),
                        Err(item) => {
                            dropped += 1;
                            debug!("Dropping unparsable {item}");
                            continue;
                        }
                    }
                } else {
                    item
                };
                if let Item::Parsed(packet) = &item {
                    parsed += 1;
                    info!("Packet {parsed}: {packet}");
                }
                out.send(item).await?;
            }
            info!("Inspected {parsed} packets, dropped {dropped}");
            Err(CoreError::input_closed())
        }))
    }

    fn revert(&self, mut input: ItemReceiver, _message: Message) -> Result<ItemReceiver, CoreError> {
        Ok(launch(&self.common, |out| async move {
            let (mut count, mut bytes) = (0usize, 0usize);
            while let Some(item) = input.recv().await {
                count += 1;
                bytes += item.payload().len();
                info!("Item {count}: {} bytes tagged {:?}", item.payload().len(), item.tag());
                out.send(item).await?;
            }
            info!("Forwarded {count} items, {bytes} bytes in total");
            Err(CoreError::input_closed())
        }))
    }
}
