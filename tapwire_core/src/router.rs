use crate::adapter::Adapter;
use crate::error::{CoreError, CoreErrorKind};
use crate::launch::{ItemReceiver, ItemSender};
use crate::pipe::Pipe;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Span;

/// Capacity of the control channel handed to the reader.
pub const CONTROL_CHANNEL_SIZE: usize = 1;

/// Wires a reader, optional pipes and a writer into running stages.
///
/// `run` returns the control sender, whose drop shuts the graph down, and the writer's
/// completion channel.
#[async_trait]
pub trait Router: Send + Sync {
    async fn run(&self) -> Result<(ItemSender, ItemReceiver), CoreError>;

    fn add_pipe(&mut self, pipe: Arc<dyn Pipe>) -> Result<(), CoreError>;

    fn set_reader(&mut self, reader: Arc<dyn Adapter>);

    fn set_writer(&mut self, writer: Arc<dyn Adapter>);

    fn set_logger(&mut self, logger: Span);

    fn pipes(&self) -> &[Arc<dyn Pipe>];
}

/// Router connecting the reader straight to the writer.
pub struct BaseRouter {
    reader: Option<Arc<dyn Adapter>>,
    writer: Option<Arc<dyn Adapter>>,
    logger: Span,
}

impl Default for BaseRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseRouter {
    pub fn new() -> Self {
        Self {
            reader: None,
            writer: None,
            logger: Span::none(),
        }
    }

    pub fn logger(&self) -> &Span {
        &self.logger
    }

    /// Starts the reader, each pipe in order and finally the writer, feeding every
    /// stage's output into the next one.
    pub(crate) async fn connect(
        &self,
        pipes: &[Arc<dyn Pipe>],
    ) -> Result<(ItemSender, ItemReceiver), CoreError> {
        let (Some(reader), Some(writer)) = (&self.reader, &self.writer) else {
            return Err(CoreError::new(CoreErrorKind::NoReaderOrWriter, ""));
        };

        let (control, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
        let mut stream = reader.read(control_rx, None).await?;
        debug!("Reader {} started", reader.label());

        for pipe in pipes {
            stream = if pipe.is_converter() {
                pipe.convert(stream, None)?
            } else {
                pipe.revert(stream, None)?
            };
            debug!("Pipe {} started", pipe.label());
        }

        let done = writer.write(stream, None).await?;
        debug!("Writer {} started", writer.label());
        Ok((control, done))
    }
}

#[async_trait]
impl Router for BaseRouter {
    async fn run(&self) -> Result<(ItemSender, ItemReceiver), CoreError> {
        self.connect(&[]).await
    }

    fn add_pipe(&mut self, _pipe: Arc<dyn Pipe>) -> Result<(), CoreError> {
        Err(CoreError::new(CoreErrorKind::PipelineNotSupported, ""))
    }

    fn set_reader(&mut self, reader: Arc<dyn Adapter>) {
        reader.set_logger(self.logger.clone());
        self.reader = Some(reader);
    }

    fn set_writer(&mut self, writer: Arc<dyn Adapter>) {
        writer.set_logger(self.logger.clone());
        self.writer = Some(writer);
    }

    fn set_logger(&mut self, logger: Span) {
        for adapter in self.reader.iter().chain(self.writer.iter()) {
            adapter.set_logger(logger.clone());
        }
        self.logger = logger;
    }

    fn pipes(&self) -> &[Arc<dyn Pipe>] {
        &[]
    }
}

/// Router running an ordered list of pipes between the reader and the writer.
#[derive(Default)]
pub struct Pipeline {
    base: BaseRouter,
    pipes: Vec<Arc<dyn Pipe>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Router for Pipeline {
    async fn run(&self) -> Result<(ItemSender, ItemReceiver), CoreError> {
        self.base.connect(&self.pipes).await
    }

    fn add_pipe(&mut self, pipe: Arc<dyn Pipe>) -> Result<(), CoreError> {
        pipe.set_logger(self.base.logger().clone());
        self.pipes.push(pipe);
        Ok(())
    }

    fn set_reader(&mut self, reader: Arc<dyn Adapter>) {
        self.base.set_reader(reader);
    }

    fn set_writer(&mut self, writer: Arc<dyn Adapter>) {
        self.base.set_writer(writer);
    }

    fn set_logger(&mut self, logger: Span) {
        for pipe in &self.pipes {
            pipe.set_logger(logger.clone());
        }
        self.base.set_logger(logger);
    }

    fn pipes(&self) -> &[Arc<dyn Pipe>] {
        &self.pipes
    }
}
