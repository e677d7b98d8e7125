//! End-to-end tests of the router engine using the in-crate collaborators.

use std::sync::Arc;
use std::time::Duration;

use tapwire_core::dummy::{DummyAdapter, DummyPipe};
use tapwire_core::generator::{GeneratorAdapter, check_packet};
use tapwire_core::item::{ITEM_TYPE_PACKET, StatusKind};
use tapwire_core::launch::launch;
use tapwire_core::{
    BaseAdapter, BasePipe, BaseRouter, Common, Component, CoreError, CoreErrorKind,
    Item, ItemReceiver, Message, Mode, Pipe, Pipeline, Router,
};
use tokio::time::{sleep, timeout};

const GUARD: Duration = Duration::from_secs(5);

fn generator_pipeline(pipes: Vec<Arc<dyn Pipe>>) -> Pipeline {
    let mut pipeline = Pipeline::new();
    pipeline.set_reader(Arc::new(GeneratorAdapter::new()));
    pipeline.set_writer(Arc::new(GeneratorAdapter::new()));
    for pipe in pipes {
        pipeline.add_pipe(pipe).unwrap();
    }
    pipeline
}

async fn drain(done: &mut ItemReceiver) -> Vec<Item> {
    let mut items = Vec::new();
    while let Some(item) = timeout(GUARD, done.recv()).await.expect("completion timed out") {
        items.push(item);
    }
    items
}

async fn wait_for_error(component: &dyn Component) -> CoreError {
    timeout(GUARD, async {
        loop {
            if let Some(error) = component.last_error() {
                return error;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("no error recorded")
}

/// Pipe that panics when it sees its second item.
struct PanickingPipe {
    common: Common,
}

impl Component for PanickingPipe {
    fn common(&self) -> &Common {
        &self.common
    }
}

impl Pipe for PanickingPipe {
    fn mode(&self) -> Mode {
        Mode::Converter
    }

    fn convert(&self, mut input: ItemReceiver, _message: Message) -> Result<ItemReceiver, CoreError> {
        Ok(launch(&self.common, |out| async move {
            let mut seen = 0;
            while let Some(item) = input.recv().await {
                seen += 1;
                if seen == 2 {
                    panic!("second item");
                }
                out.send(item).await?;
            }
            Err(CoreError::input_closed())
        }))
    }
}

#[tokio::test]
async fn generated_packet_reaches_completion_channel() {
    let pipeline = generator_pipeline(Vec::new());
    let (control, mut done) = pipeline.run().await.unwrap();

    control.send(Item::raw(ITEM_TYPE_PACKET, "TestData")).await.unwrap();
    let item = timeout(GUARD, done.recv()).await.unwrap().unwrap();
    let packet = item.as_packet().expect("structured packet");
    assert_eq!(packet.application_payload(), Some(&b"TestData"[..]));

    drop(control);
    let rest = drain(&mut done).await;
    assert_eq!(rest, vec![Item::closed()]);
}

#[tokio::test]
async fn order_is_preserved_with_single_terminal_status() {
    let pipeline = generator_pipeline(vec![
        Arc::new(DummyPipe::new(Mode::Converter)),
        Arc::new(DummyPipe::new(Mode::Reverter)),
    ]);
    assert_eq!(pipeline.pipes().len(), 2);
    let (control, mut done) = pipeline.run().await.unwrap();

    let payloads: Vec<String> = (0..25).map(|i| format!("item-{i}")).collect();
    let sender = tokio::spawn(async move {
        for payload in payloads {
            control.send(Item::raw(ITEM_TYPE_PACKET, payload)).await.unwrap();
        }
    });

    let items = drain(&mut done).await;
    sender.await.unwrap();
    assert_eq!(items.len(), 26);
    for (i, item) in items[..25].iter().enumerate() {
        assert!(check_packet(item, format!("item-{i}").as_bytes()));
    }
    assert_eq!(items.iter().filter(|item| item.is_status()).count(), 1);
    assert_eq!(items.last(), Some(&Item::closed()));
}

#[tokio::test]
async fn closing_control_drains_items_in_flight() {
    let reader = Arc::new(DummyAdapter::new(Duration::from_millis(1)));
    let writer = Arc::new(GeneratorAdapter::new());
    let mut pipeline = Pipeline::new();
    pipeline.set_reader(reader.clone());
    pipeline.set_writer(writer.clone());
    pipeline.add_pipe(Arc::new(DummyPipe::new(Mode::Converter))).unwrap();

    let (control, mut done) = pipeline.run().await.unwrap();
    for _ in 0..3 {
        let item = timeout(GUARD, done.recv()).await.unwrap().unwrap();
        assert!(!item.is_status());
    }
    drop(control);

    let rest = drain(&mut done).await;
    assert_eq!(rest.last(), Some(&Item::closed()));
    assert_eq!(
        reader.last_error().map(|e| e.kind()),
        Some(CoreErrorKind::Interrupted)
    );
    assert!(writer.last_error().is_none());
}

#[tokio::test]
async fn run_without_endpoints_fails() {
    let mut pipeline = Pipeline::new();
    let error = pipeline.run().await.unwrap_err();
    assert_eq!(error.kind(), CoreErrorKind::NoReaderOrWriter);

    pipeline.set_reader(Arc::new(GeneratorAdapter::new()));
    let error = pipeline.run().await.unwrap_err();
    assert_eq!(error.kind(), CoreErrorKind::NoReaderOrWriter);

    let mut router = BaseRouter::new();
    router.set_writer(Arc::new(GeneratorAdapter::new()));
    let error = router.run().await.unwrap_err();
    assert_eq!(error.kind(), CoreErrorKind::NoReaderOrWriter);
}

#[tokio::test]
async fn base_router_rejects_pipes() {
    let mut router = BaseRouter::new();
    let error = router
        .add_pipe(Arc::new(DummyPipe::new(Mode::Converter)))
        .unwrap_err();
    assert_eq!(error.kind(), CoreErrorKind::PipelineNotSupported);
    assert_eq!(router.pipes().len(), 0);
}

#[tokio::test]
async fn base_router_connects_reader_to_writer() {
    let mut router = BaseRouter::new();
    router.set_reader(Arc::new(GeneratorAdapter::new()));
    router.set_writer(Arc::new(GeneratorAdapter::new()));
    let (control, mut done) = router.run().await.unwrap();

    control.send(Item::raw(ITEM_TYPE_PACKET, "direct")).await.unwrap();
    drop(control);
    let items = drain(&mut done).await;
    assert_eq!(items.len(), 2);
    assert!(check_packet(&items[0], b"direct"));
}

#[tokio::test]
async fn unimplemented_stage_aborts_run() {
    let mut router = BaseRouter::new();
    router.set_reader(Arc::new(BaseAdapter::new("base")));
    router.set_writer(Arc::new(GeneratorAdapter::new()));
    let error = router.run().await.unwrap_err();
    assert_eq!(error.kind(), CoreErrorKind::ReadNotImplemented);

    let reader = Arc::new(GeneratorAdapter::new());
    let mut pipeline = Pipeline::new();
    pipeline.set_reader(reader.clone());
    pipeline.set_writer(Arc::new(GeneratorAdapter::new()));
    pipeline
        .add_pipe(Arc::new(BasePipe::new("base", Mode::Converter)))
        .unwrap();
    let error = pipeline.run().await.unwrap_err();
    assert_eq!(error.kind(), CoreErrorKind::ConvertNotImplemented);

    // The reader started before the failing pipe shuts down on its own.
    let reader_error = wait_for_error(reader.as_ref()).await;
    assert_eq!(reader_error.kind(), CoreErrorKind::Interrupted);
}

#[tokio::test]
async fn panicking_pipe_still_closes_the_pipeline() {
    let pipe = Arc::new(PanickingPipe {
        common: Common::new("panicking"),
    });
    let pipeline = generator_pipeline(vec![pipe.clone()]);
    let (control, mut done) = pipeline.run().await.unwrap();

    control.send(Item::raw(ITEM_TYPE_PACKET, "one")).await.unwrap();
    control.send(Item::raw(ITEM_TYPE_PACKET, "two")).await.unwrap();

    let items = drain(&mut done).await;
    assert!(check_packet(&items[0], b"one"));
    assert!(matches!(
        items.last(),
        Some(Item::Status(status)) if status.kind == StatusKind::Closed
    ));
    let error = pipe.last_error().unwrap();
    assert_eq!(error.kind(), CoreErrorKind::StagePanicked);
    assert_eq!(error.message, "second item");
    drop(control);
}
