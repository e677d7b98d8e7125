use bytes::Bytes;
use log::{debug, info, warn};
use tapwire_core::common::{Common, Component};
use tapwire_core::error::{CoreError, CoreErrorKind};
use tapwire_core::item::{Item, Message};
use tapwire_core::launch::{ItemReceiver, launch};
use tapwire_core::pipe::{Mode, Pipe};

pub const ITEM_TYPE_LZ4: &str = "application/lz4";

/// Upper bound on the size a compressed item may declare.
pub const MAX_DECOMPRESSED_SIZE: usize = 1 << 20;

const SIZE_PREFIX_LEN: usize = 4;

pub fn compress(payload: &[u8]) -> Bytes {
    Bytes::from(lz4_flex::block::compress_prepend_size(payload))
}

/// Inverse of `compress`, refusing declared sizes above `MAX_DECOMPRESSED_SIZE`.
pub fn decompress(payload: &[u8]) -> Result<Bytes, CoreError> {
    let (prefix, block) = payload
        .split_at_checked(SIZE_PREFIX_LEN)
        .ok_or(CoreError::new(CoreErrorKind::DecompressError, "missing size prefix"))?;
    let mut size = [0u8; SIZE_PREFIX_LEN];
    size.copy_from_slice(prefix);
    let size = u32::from_le_bytes(size) as usize;
    if size > MAX_DECOMPRESSED_SIZE {
        return Err(CoreError::new(
            CoreErrorKind::DecompressError,
            &format!("declared size {size} exceeds {MAX_DECOMPRESSED_SIZE}"),
        ));
    }
    let decompressed = lz4_flex::block::decompress(block, size)
        .map_err(|e| CoreError::new(CoreErrorKind::DecompressError, e.to_string().as_str()))?;
    Ok(Bytes::from(decompressed))
}

/// LZ4 block compression. `convert` emits items tagged `application/lz4`,
/// `revert` restores only those.
#[derive(Debug, Clone)]
pub struct Lz4Pipe {
    common: Common,
    mode: Mode,
}

impl Lz4Pipe {
    pub fn new(mode: Mode) -> Self {
        let label = match mode {
            Mode::Converter => "lz4-convert",
            Mode::Reverter => "lz4-revert",
        };
        Self {
            common: Common::new(label),
            mode,
        }
    }
}

impl Component for Lz4Pipe {
    fn common(&self) -> &Common {
        &self.common
    }
}

impl Pipe for Lz4Pipe {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn convert(&self, mut input: ItemReceiver, _message: Message) -> Result<ItemReceiver, CoreError> {
        Ok(launch(&self.common, |out| async move {
            let (mut raw_bytes, mut compressed_bytes) = (0usize, 0usize);
            while let Some(item) = input.recv().await {
                if item.is_status() || item.tag() == ITEM_TYPE_LZ4 {
                    out.send(item).await?;
                    continue;
                }
                let compressed = compress(item.payload());
                raw_bytes += item.payload().len();
                compressed_bytes += compressed.len();
                out.send(Item::raw(ITEM_TYPE_LZ4, compressed)).await?;
            }
            info!("Compressed {raw_bytes} bytes into {compressed_bytes}");
            Err(CoreError::input_closed())
        }))
    }

    fn revert(&self, mut input: ItemReceiver, _message: Message) -> Result<ItemReceiver, CoreError> {
        Ok(launch(&self.common, |out| async move {
            let (mut restored, mut failed) = (0usize, 0usize);
            while let Some(item) = input.recv().await {
                if item.tag() != ITEM_TYPE_LZ4 {
                    out.send(item).await?;
                    continue;
                }
                match decompress(item.payload()) {
                    Ok(payload) => {
                        restored += 1;
                        out.send(Item::from_wire(payload)).await?;
                    }
                    Err(e) => {
                        failed += 1;
                        warn!("Dropping {item}: {e}");
                    }
                }
            }
            debug!("Decompressed {restored} items");
            if failed > 0 {
                return Err(CoreError::new(
                    CoreErrorKind::DecompressError,
                    &format!("{failed} items could not be decompressed"),
                ));
            }
            Err(CoreError::input_closed())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tapwire_core::generator::{check_packet, generate_packet};
    use tapwire_core::launch::channel;

    async fn run_one(pipe: &Lz4Pipe, item: Item) -> Vec<Item> {
        let (tx, rx) = channel();
        let mut out = if pipe.is_converter() {
            pipe.convert(rx, None).unwrap()
        } else {
            pipe.revert(rx, None).unwrap()
        };
        tx.send(item).await.unwrap();
        drop(tx);
        let mut items = Vec::new();
        while let Some(item) = out.recv().await {
            items.push(item);
        }
        items
    }

    #[tokio::test]
    async fn revert_restores_converted_packets() {
        let frame = generate_packet(b"TestData").unwrap();
        let converter = Lz4Pipe::new(Mode::Converter);
        let reverter = Lz4Pipe::new(Mode::Reverter);

        let compressed = run_one(&converter, Item::from_wire(frame.clone())).await;
        assert_eq!(compressed.len(), 1);
        assert_eq!(compressed[0].tag(), ITEM_TYPE_LZ4);

        let restored = run_one(&reverter, compressed[0].clone()).await;
        assert_eq!(restored[0].payload(), &frame);
        assert!(check_packet(&restored[0], b"TestData"));
        assert_eq!(
            reverter.last_error().map(|e| e.kind()),
            Some(CoreErrorKind::InputClosed)
        );
    }

    #[tokio::test]
    async fn convert_leaves_compressed_items_alone() {
        let converter = Lz4Pipe::new(Mode::Converter);
        let item = Item::raw(ITEM_TYPE_LZ4, compress(b"already"));
        assert_eq!(run_one(&converter, item.clone()).await, vec![item]);
        assert_eq!(run_one(&converter, Item::closed()).await, vec![Item::closed()]);
    }

    #[tokio::test]
    async fn revert_passes_other_tags_through() {
        let reverter = Lz4Pipe::new(Mode::Reverter);
        let item = Item::raw("rawpacket", vec![1u8, 2, 3]);
        assert_eq!(run_one(&reverter, item.clone()).await, vec![item]);
    }

    #[tokio::test]
    async fn malformed_input_is_dropped_and_recorded() {
        let reverter = Lz4Pipe::new(Mode::Reverter);
        let items = run_one(&reverter, Item::raw(ITEM_TYPE_LZ4, vec![0xffu8; 3])).await;
        assert!(items.is_empty());
        assert_eq!(
            reverter.last_error().map(|e| e.kind()),
            Some(CoreErrorKind::DecompressError)
        );
    }

    #[test]
    fn declared_size_is_bounded() {
        let mut payload = ((MAX_DECOMPRESSED_SIZE + 1) as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(&[0u8; 8]);
        let error = decompress(&payload).unwrap_err();
        assert_eq!(error.kind(), CoreErrorKind::DecompressError);
        assert_eq!(decompress(&compress(b"")).unwrap(), Bytes::new());
    }
}
