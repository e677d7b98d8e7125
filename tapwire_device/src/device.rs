use crate::capture::{CaptureOptions, ItemCodec, activate, capture_error, open_inactive};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use pcap::{Capture, Inactive};
use std::sync::{Mutex, MutexGuard};
use tapwire_core::adapter::Adapter;
use tapwire_core::common::{Common, Component};
use tapwire_core::error::{CoreError, CoreErrorKind};
use tapwire_core::item::{ITEM_TYPE_RAW_PACKET, ITEM_TYPE_UNKNOWN, Item, Message};
use tapwire_core::launch::{ItemReceiver, finish, launch};
use tokio_util::sync::CancellationToken;

/// Adapter capturing from and injecting into a network interface.
///
/// In test mode no capture handle exists: `write` only counts what it drains and
/// every other operation fails with `NotInitialized`.
pub struct DeviceAdapter {
    common: Common,
    device: String,
    test_mode: bool,
    options: Mutex<CaptureOptions>,
    inactive: Mutex<Option<Capture<Inactive>>>,
    shutdown: CancellationToken,
}

impl DeviceAdapter {
    pub fn new(device: &str) -> Result<Self, CoreError> {
        let inactive = open_inactive(device)?;
        Ok(Self::build(device, Some(inactive)))
    }

    pub fn test(device: &str) -> Self {
        Self::build(device, None)
    }

    fn build(device: &str, inactive: Option<Capture<Inactive>>) -> Self {
        Self {
            common: Common::new("device"),
            device: device.to_owned(),
            test_mode: inactive.is_none(),
            options: Mutex::new(CaptureOptions::default()),
            inactive: Mutex::new(inactive),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn device(&self) -> &str {
        self.device.as_str()
    }

    pub fn is_test(&self) -> bool {
        self.test_mode
    }

    pub fn set_options(&self, options: CaptureOptions) -> Result<(), CoreError> {
        self.ensure_initialized()?;
        *lock(&self.options)? = options;
        Ok(())
    }

    pub fn options(&self) -> Result<CaptureOptions, CoreError> {
        Ok(lock(&self.options)?.clone())
    }

    fn ensure_initialized(&self) -> Result<(), CoreError> {
        if self.test_mode {
            return Err(CoreError::new(
                CoreErrorKind::NotInitialized,
                &format!("no capture handle for {}", self.device),
            ));
        }
        Ok(())
    }

    /// Activates the pre-allocated handle, or a fresh one once it has been used.
    fn open(&self) -> Result<pcap::Capture<pcap::Active>, CoreError> {
        self.ensure_initialized()?;
        let inactive = match lock(&self.inactive)?.take() {
            Some(inactive) => inactive,
            None => open_inactive(&self.device)?,
        };
        let options = self.options()?;
        activate(&self.device, inactive, &options)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, CoreError> {
    mutex
        .lock()
        .map_err(|e| CoreError::new(CoreErrorKind::CaptureError, e.to_string().as_str()))
}

fn is_injectable(item: &Item) -> bool {
    match item {
        Item::Parsed(_) => true,
        Item::Raw(raw) => raw.tag == ITEM_TYPE_RAW_PACKET || raw.tag == ITEM_TYPE_UNKNOWN,
        Item::Status(_) => false,
    }
}

impl Component for DeviceAdapter {
    fn common(&self) -> &Common {
        &self.common
    }
}

#[async_trait]
impl Adapter for DeviceAdapter {
    async fn read(
        &self,
        mut control: ItemReceiver,
        _message: Message,
    ) -> Result<ItemReceiver, CoreError> {
        let capture = self.open()?.setnonblock().map_err(capture_error)?;
        let mut packets = capture.stream(ItemCodec).map_err(capture_error)?;
        let shutdown = self.shutdown.clone();
        let device = self.device.clone();
        Ok(launch(&self.common, |out| async move {
            let mut captured = 0usize;
            let result = loop {
                tokio::select! {
                    request = control.recv() => match request {
                        None => break Err(CoreError::interrupted()),
                        Some(request) => debug!("Ignoring control item {request}"),
                    },
                    _ = shutdown.cancelled() => break Err(CoreError::interrupted()),
                    packet = packets.next() => match packet {
                        Some(Ok(item)) => {
                            captured += 1;
                            if out.send(item).await.is_err() {
                                break Ok(());
                            }
                        }
                        Some(Err(e)) => break Err(capture_error(e)),
                        None => break Ok(()),
                    },
                }
            };
            info!("Captured {captured} packets on {device}");
            result
        }))
    }

    async fn write(
        &self,
        mut input: ItemReceiver,
        _message: Message,
    ) -> Result<ItemReceiver, CoreError> {
        let mut capture = if self.test_mode {
            None
        } else {
            Some(self.open()?)
        };
        let device = self.device.clone();
        Ok(launch(&self.common, |done| async move {
            let (mut injected, mut skipped) = (0usize, 0usize);
            let mut result = Ok(());
            while let Some(item) = input.recv().await {
                if !is_injectable(&item) {
                    skipped += 1;
                    debug!("Skipping {item}");
                    continue;
                }
                if let Some(capture) = capture.as_mut() {
                    if let Err(e) = capture.sendpacket(&item.payload()[..]) {
                        warn!("Could not inject {item} on {device}: {e}");
                        result = Err(capture_error(e));
                        break;
                    }
                }
                injected += 1;
            }
            if capture.is_some() {
                info!("Injected {injected} packets on {device}, skipped {skipped}");
            } else {
                info!("Test mode: counted {injected} packets for {device}, skipped {skipped}");
            }
            finish(&done, result).await
        }))
    }

    async fn close(&self) -> Result<(), CoreError> {
        self.shutdown.cancel();
        Ok(())
    }
}
