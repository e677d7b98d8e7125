use crate::common::{Common, Component};
use crate::error::{CoreError, CoreErrorKind};
use crate::item::Message;
use crate::launch::ItemReceiver;

/// Direction a pipe runs in once it is part of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Converter,
    Reverter,
}

/// A transform stage with a forward (`convert`) and an inverse (`revert`) direction.
///
/// Each call spawns exactly one task that consumes `input` and closes its output when
/// `input` closes, recording `InputClosed`. `convert` leaves items it already converted
/// untouched; `revert` passes through items it does not recognise.
pub trait Pipe: Component + Send + Sync {
    fn mode(&self) -> Mode;

    fn is_converter(&self) -> bool {
        self.mode() == Mode::Converter
    }

    fn convert(&self, input: ItemReceiver, message: Message) -> Result<ItemReceiver, CoreError> {
        let _ = (input, message);
        Err(CoreError::new(
            CoreErrorKind::ConvertNotImplemented,
            self.label(),
        ))
    }

    fn revert(&self, input: ItemReceiver, message: Message) -> Result<ItemReceiver, CoreError> {
        let _ = (input, message);
        Err(CoreError::new(
            CoreErrorKind::RevertNotImplemented,
            self.label(),
        ))
    }
}

/// Pipe with neither direction implemented.
#[derive(Debug, Clone)]
pub struct BasePipe {
    common: Common,
    mode: Mode,
}

impl BasePipe {
    pub fn new(label: &str, mode: Mode) -> Self {
        Self {
            common: Common::new(label),
            mode,
        }
    }
}

impl Component for BasePipe {
    fn common(&self) -> &Common {
        &self.common
    }
}

impl Pipe for BasePipe {
    fn mode(&self) -> Mode {
        self.mode
    }
}
