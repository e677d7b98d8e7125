use crate::common::{Common, Component};
use crate::error::{CoreError, CoreErrorKind};
use crate::item::Message;
use crate::launch::ItemReceiver;
use async_trait::async_trait;

/// A pipeline endpoint. `read` starts a producer, `write` starts a consumer.
///
/// Both are called at most once per instance. Activation happens inside the call and
/// its failure is returned directly with no task left running; failures of the running
/// task are recorded as the last error and become visible once its output closes.
#[async_trait]
pub trait Adapter: Component + Send + Sync {
    /// Emits items on the returned channel until the source is exhausted or `control`
    /// closes; the latter is recorded as `Interrupted`.
    async fn read(
        &self,
        control: ItemReceiver,
        message: Message,
    ) -> Result<ItemReceiver, CoreError> {
        let _ = (control, message);
        Err(CoreError::new(CoreErrorKind::ReadNotImplemented, self.label()))
    }

    /// Drains `input` and then yields exactly one terminal status item before the
    /// returned channel closes.
    async fn write(
        &self,
        input: ItemReceiver,
        message: Message,
    ) -> Result<ItemReceiver, CoreError> {
        let _ = (input, message);
        Err(CoreError::new(CoreErrorKind::WriteNotImplemented, self.label()))
    }

    /// Releases OS resources. Idempotent and never waits for running tasks.
    async fn close(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Adapter with neither direction implemented.
#[derive(Debug, Clone)]
pub struct BaseAdapter {
    common: Common,
}

impl BaseAdapter {
    pub fn new(label: &str) -> Self {
        Self {
            common: Common::new(label),
        }
    }
}

impl Component for BaseAdapter {
    fn common(&self) -> &Common {
        &self.common
    }
}

#[async_trait]
impl Adapter for BaseAdapter {}
