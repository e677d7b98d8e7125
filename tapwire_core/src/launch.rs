use crate::common::Common;
use crate::error::{CoreError, CoreErrorKind};
use crate::item::Item;
use futures::FutureExt;
use log::{debug, error, warn};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Capacity of every channel between two stages.
pub const CHANNEL_SIZE: usize = 10;

pub type ItemSender = mpsc::Sender<Item>;
pub type ItemReceiver = mpsc::Receiver<Item>;

pub fn channel() -> (ItemSender, ItemReceiver) {
    mpsc::channel(CHANNEL_SIZE)
}

/// Allocates the output channel of a stage and spawns the stage on it.
///
/// Never blocks. Clears the outcome of the previous launch; the returned receiver
/// closes once the stage has finished and its outcome has been recorded on `common`.
pub fn launch<F, Fut>(common: &Common, stage: F) -> ItemReceiver
where
    F: FnOnce(ItemSender) -> Fut,
    Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
{
    common.clear_error();
    let (out, rx) = channel();
    spawn_stage(common, out.clone(), stage(out));
    rx
}

/// Runs `stage` as a task inside the component's span.
///
/// An `Err` returned by the stage, the non-fault `InputClosed` and `Interrupted`
/// included, becomes the component's last error; a panic is recorded as
/// `StagePanicked`. `guard` keeps the output channel open until that record is written.
pub fn spawn_stage<Fut>(common: &Common, guard: ItemSender, stage: Fut) -> JoinHandle<()>
where
    Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
{
    let common = common.clone();
    let span = common.stage_span();
    tokio::spawn(
        async move {
            match AssertUnwindSafe(stage).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if e.is_fault() {
                        warn!("{} stopped: {e}", common.label());
                    } else {
                        debug!("{} finished: {e}", common.label());
                    }
                    common.set_error(e);
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!("{} panicked: {message}", common.label());
                    common.set_error(CoreError::new(CoreErrorKind::StagePanicked, &message));
                }
            }
            drop(guard);
        }
        .instrument(span),
    )
}

/// Emits the terminal status of a writer on `done` and hands `result` back.
pub async fn finish(done: &ItemSender, result: Result<(), CoreError>) -> Result<(), CoreError> {
    let status = match &result {
        Err(e) if e.is_fault() => Item::aborted(e),
        _ => Item::closed(),
    };
    if done.send(status).await.is_err() {
        debug!("Completion receiver dropped before the terminal status");
    }
    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn error_is_visible_once_output_closes() {
        let common = Common::new("failing");
        let mut rx = launch(&common, |_out| async {
            Err(CoreError::new(CoreErrorKind::ReadError, "boom"))
        });
        let next = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(next.is_none());
        assert_eq!(
            common.last_error().map(|e| e.kind()),
            Some(CoreErrorKind::ReadError)
        );
    }

    #[tokio::test]
    async fn panic_is_recorded_and_channel_closes() {
        let common = Common::new("panicking");
        let mut rx = launch(&common, |out| async move {
            out.send(Item::closed()).await?;
            panic!("stage blew up")
        });
        assert_eq!(rx.recv().await, Some(Item::closed()));
        let next = timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(next.is_none());
        let error = common.last_error().unwrap();
        assert_eq!(error.kind(), CoreErrorKind::StagePanicked);
        assert_eq!(error.message, "stage blew up");
    }

    #[tokio::test]
    async fn relaunch_clears_previous_outcome() {
        let common = Common::new("relaunched");
        let mut rx = launch(&common, |_out| async {
            Err(CoreError::new(CoreErrorKind::ReadError, "boom"))
        });
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
        assert!(common.last_error().is_some());

        let mut rx = launch(&common, |_out| async { Ok(()) });
        assert!(common.last_error().is_none());
        assert!(timeout(Duration::from_secs(1), rx.recv()).await.unwrap().is_none());
        assert!(common.last_error().is_none());
    }

    #[tokio::test]
    async fn finish_sends_aborted_on_fault() {
        let (done, mut rx) = channel();
        let error = CoreError::new(CoreErrorKind::WriteError, "");
        let result = finish(&done, Err(error.clone())).await;
        assert_eq!(result, Err(error.clone()));
        assert_eq!(rx.recv().await, Some(Item::aborted(&error)));

        assert!(finish(&done, Ok(())).await.is_ok());
        assert_eq!(rx.recv().await, Some(Item::closed()));
    }
}
