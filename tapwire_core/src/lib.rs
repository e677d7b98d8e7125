pub mod adapter;
pub mod common;
pub mod dummy;
pub mod error;
pub mod generator;
pub mod item;
pub mod launch;
pub mod metadata;
pub mod pipe;
pub mod router;

pub use adapter::{Adapter, BaseAdapter};
pub use common::{Common, Component};
pub use error::{CoreError, CoreErrorKind};
pub use item::{Item, Message};
pub use launch::{CHANNEL_SIZE, ItemReceiver, ItemSender};
pub use pipe::{BasePipe, Mode, Pipe};
pub use router::{BaseRouter, Pipeline, Router};
