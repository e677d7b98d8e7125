pub mod debug;
pub mod lz4;

pub use debug::DebugPipe;
pub use lz4::{ITEM_TYPE_LZ4, Lz4Pipe};
