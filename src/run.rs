use crate::config::AppConfig;
use crate::error::AppError;
use log::{debug, error, info, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tapwire_core::item::{Item, StatusKind};
use tapwire_core::{Adapter, Mode, Pipeline, Router};
use tapwire_device::DeviceAdapter;
use tapwire_pipes::{DebugPipe, ITEM_TYPE_LZ4, Lz4Pipe};
use tapwire_transport::Transport;

fn open_device(config: &AppConfig) -> Result<DeviceAdapter, AppError> {
    let device = config.capture.device.as_str();
    if config.capture.test {
        info!("Test mode: packets for {device} are counted, not injected");
        return Ok(DeviceAdapter::test(device));
    }
    debug!("Initializing device {device}");
    let adapter = DeviceAdapter::new(device)?;
    adapter.set_options(config.capture_options())?;
    Ok(adapter)
}

fn open_transport(config: &AppConfig) -> Result<Transport, AppError> {
    let transport = &config.transport;
    if transport.server {
        if transport.addr.is_empty() {
            return Ok(Transport::new("", transport.port)?);
        }
        let ip: IpAddr = transport.addr.parse()?;
        return Ok(Transport::server(SocketAddr::new(ip, transport.port)));
    }
    if transport.addr.is_empty() {
        return Err(AppError::ArgumentError(
            "a client needs the address of its server".to_string(),
        ));
    }
    Ok(Transport::new(&transport.addr, transport.port)?)
}

/// Builds the pipeline for the configured role and runs it until the writer
/// finishes or the process is interrupted.
pub async fn run(config: &AppConfig) -> Result<(), AppError> {
    let server = config.transport.server;
    let role = if server { "server" } else { "client" };
    let mut router = Pipeline::new();
    router.set_logger(tracing::info_span!("router", role));

    let reader: Arc<dyn Adapter>;
    let writer: Arc<dyn Adapter>;
    if server {
        let transport = open_transport(config)?;
        reader = if config.pipeline.compress {
            Arc::new(transport.with_receive_tag(ITEM_TYPE_LZ4))
        } else {
            Arc::new(transport)
        };
        writer = Arc::new(open_device(config)?);
        if config.pipeline.compress {
            router.add_pipe(Arc::new(Lz4Pipe::new(Mode::Reverter)))?;
        }
        if config.pipeline.debug {
            router.add_pipe(Arc::new(DebugPipe::new(Mode::Converter)))?;
        }
    } else {
        reader = Arc::new(open_device(config)?);
        writer = Arc::new(open_transport(config)?);
        if config.pipeline.debug {
            router.add_pipe(Arc::new(DebugPipe::new(Mode::Converter)))?;
        }
        if config.pipeline.compress {
            router.add_pipe(Arc::new(Lz4Pipe::new(Mode::Converter)))?;
        }
    }
    router.set_reader(reader.clone());
    router.set_writer(writer.clone());

    let (control, mut done) = router.run().await.inspect_err(|e| {
        error!("Could not start the router: {e}");
    })?;
    let mut control = Some(control);

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c(), if control.is_some() => {
                signal?;
                info!("Interrupted, shutting down gracefully");
                control = None;
            }
            status = done.recv() => match status {
                Some(Item::Status(status)) if status.kind == StatusKind::Aborted => {
                    warn!("Writer aborted: {}", String::from_utf8_lossy(&status.payload));
                }
                Some(item) => debug!("Completion: {item}"),
                None => break,
            },
        }
    }
    drop(control);

    reader.close().await?;
    writer.close().await?;
    for adapter in [&reader, &writer] {
        if let Some(e) = adapter.last_error().filter(|e| e.is_fault()) {
            error!("{} failed: {e}", adapter.label());
            return Err(e.into());
        }
    }
    info!("Done");
    Ok(())
}
