use crate::adapter::Adapter;
use crate::common::{Common, Component};
use crate::error::CoreError;
use crate::item::{ITEM_TYPE_UNKNOWN, Item, Message};
use crate::launch::{ItemReceiver, finish, launch};
use crate::pipe::{Mode, Pipe};
use async_trait::async_trait;
use log::{debug, info};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

pub const DUMMY_INTERVAL: Duration = Duration::from_millis(500);

/// Reader emits a one-byte item on every tick; writer counts what it drains.
#[derive(Debug, Clone)]
pub struct DummyAdapter {
    common: Common,
    period: Duration,
}

impl Default for DummyAdapter {
    fn default() -> Self {
        Self::new(DUMMY_INTERVAL)
    }
}

impl DummyAdapter {
    pub fn new(period: Duration) -> Self {
        Self {
            common: Common::new("dummy"),
            period,
        }
    }
}

impl Component for DummyAdapter {
    fn common(&self) -> &Common {
        &self.common
    }
}

#[async_trait]
impl Adapter for DummyAdapter {
    async fn read(
        &self,
        mut control: ItemReceiver,
        _message: Message,
    ) -> Result<ItemReceiver, CoreError> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Ok(launch(&self.common, |out| async move {
            loop {
                tokio::select! {
                    request = control.recv() => match request {
                        None => return Err(CoreError::interrupted()),
                        Some(request) => debug!("Ignoring control item {request}"),
                    },
                    _ = ticker.tick() => {
                        if out.send(Item::raw(ITEM_TYPE_UNKNOWN, vec![4u8])).await.is_err() {
                            return Ok(());
                        }
                    }
                }
            }
        }))
    }

    async fn write(
        &self,
        mut input: ItemReceiver,
        _message: Message,
    ) -> Result<ItemReceiver, CoreError> {
        Ok(launch(&self.common, |done| async move {
            let mut count = 0usize;
            while let Some(item) = input.recv().await {
                count += 1;
                debug!("Dummy writer received {item}");
            }
            info!("Dummy writer drained {count} items");
            finish(&done, Ok(())).await
        }))
    }
}

/// Pipe forwarding every item unchanged in either direction.
#[derive(Debug, Clone)]
pub struct DummyPipe {
    common: Common,
    mode: Mode,
}

impl DummyPipe {
    pub fn new(mode: Mode) -> Self {
        Self {
            common: Common::new("dummy-pipe"),
            mode,
        }
    }

    fn relay(&self, mut input: ItemReceiver) -> ItemReceiver {
        launch(&self.common, |out| async move {
            while let Some(item) = input.recv().await {
                out.send(item).await?;
            }
            Err(CoreError::input_closed())
        })
    }
}

impl Component for DummyPipe {
    fn common(&self) -> &Common {
        &self.common
    }
}

impl Pipe for DummyPipe {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn convert(&self, input: ItemReceiver, _message: Message) -> Result<ItemReceiver, CoreError> {
        Ok(self.relay(input))
    }

    fn revert(&self, input: ItemReceiver, _message: Message) -> Result<ItemReceiver, CoreError> {
        Ok(self.relay(input))
    }
}
