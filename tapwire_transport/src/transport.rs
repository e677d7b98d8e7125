use crate::connection::Connection;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt::{Display, Formatter};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::OnceLock;
use tapwire_core::adapter::Adapter;
use tapwire_core::common::{Common, Component};
use tapwire_core::error::{CoreError, CoreErrorKind};
use tapwire_core::item::{Item, Message};
use tapwire_core::launch::{ItemReceiver, ItemSender, finish, launch, spawn_stage};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Listens on the address and reads from every accepted peer.
    Server(SocketAddr),
    /// Dials the peer and writes to it.
    Client { host: String, port: u16 },
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Server(bind) => write!(f, "server {bind}"),
            Role::Client { host, port } => write!(f, "client {host}:{port}"),
        }
    }
}

/// Adapter carrying items over TCP as length-prefixed frames.
///
/// A server only reads: it accepts peers until its control channel closes, one
/// receiving task per peer. A client only writes, over a single connection dialed
/// when `write` is called.
///
/// Frames carry no tag. A server given a receive tag emits every frame as a raw
/// item with that tag, otherwise it types frames with `Item::from_wire`.
pub struct Transport {
    common: Common,
    role: Role,
    receive_tag: Option<String>,
    shutdown: CancellationToken,
    local_addr: OnceLock<SocketAddr>,
}

impl Transport {
    /// An empty `addr` makes a server on all interfaces, anything else a client of `addr:port`.
    pub fn new(addr: &str, port: u16) -> Result<Self, CoreError> {
        if addr.is_empty() {
            return Ok(Self::server(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))));
        }
        if port == 0 {
            return Err(CoreError::new(
                CoreErrorKind::InvalidAddress,
                &format!("no port given for {addr}"),
            ));
        }
        Ok(Self::with_role(Role::Client {
            host: addr.to_owned(),
            port,
        }))
    }

    pub fn server(bind: SocketAddr) -> Self {
        Self::with_role(Role::Server(bind))
    }

    pub fn client(remote: SocketAddr) -> Self {
        Self::with_role(Role::Client {
            host: remote.ip().to_string(),
            port: remote.port(),
        })
    }

    fn with_role(role: Role) -> Self {
        let label = match role {
            Role::Server(_) => "transport-server",
            Role::Client { .. } => "transport-client",
        };
        Self {
            common: Common::new(label),
            role,
            receive_tag: None,
            shutdown: CancellationToken::new(),
            local_addr: OnceLock::new(),
        }
    }

    /// Tags every received frame with `tag` instead of decoding it.
    pub fn with_receive_tag(mut self, tag: &str) -> Self {
        self.receive_tag = Some(tag.to_owned());
        self
    }

    pub fn receive_tag(&self) -> Option<&str> {
        self.receive_tag.as_deref()
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Address the listener is bound to, known once `read` succeeded.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    async fn bind(bind: &SocketAddr) -> Result<TcpListener, CoreError> {
        TcpListener::bind(bind).await.map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => {
                CoreError::new(CoreErrorKind::PortInUse, &format!("{bind}: {e}"))
            }
            _ => CoreError::new(CoreErrorKind::ActivationError, &format!("{bind}: {e}")),
        })
    }
}

impl Component for Transport {
    fn common(&self) -> &Common {
        &self.common
    }
}

#[async_trait]
impl Adapter for Transport {
    async fn read(
        &self,
        control: ItemReceiver,
        _message: Message,
    ) -> Result<ItemReceiver, CoreError> {
        let Role::Server(bind) = &self.role else {
            return Err(CoreError::new(
                CoreErrorKind::ReaderNotSupported,
                &self.role.to_string(),
            ));
        };
        let listener = Self::bind(bind).await?;
        let local = listener.local_addr()?;
        let _ = self.local_addr.set(local);
        info!("Listening on {local}");

        let common = self.common.clone();
        let shutdown = self.shutdown.clone();
        let tag = self.receive_tag.clone();
        Ok(launch(&self.common, |out| {
            listen(common, listener, control, shutdown, tag, out)
        }))
    }

    async fn write(
        &self,
        input: ItemReceiver,
        _message: Message,
    ) -> Result<ItemReceiver, CoreError> {
        let Role::Client { host, port } = &self.role else {
            return Err(CoreError::new(
                CoreErrorKind::WriterNotSupported,
                &self.role.to_string(),
            ));
        };
        let stream = TcpStream::connect((host.as_str(), *port))
            .await
            .map_err(|e| {
                CoreError::new(
                    CoreErrorKind::ConnectionError,
                    &format!("{host}:{port}: {e}"),
                )
            })?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        info!("Connected to {peer}");

        let common = self.common.clone();
        let shutdown = self.shutdown.clone();
        Ok(launch(&self.common, |done| async move {
            let mut connection = Connection::new(stream, peer);
            let result = transmit(&common, &mut connection, input, shutdown).await;
            finish(&done, result).await
        }))
    }

    async fn close(&self) -> Result<(), CoreError> {
        if !self.shutdown.is_cancelled() {
            debug!("Closing {}", self.role);
            self.shutdown.cancel();
        }
        Ok(())
    }
}

async fn listen(
    common: Common,
    listener: TcpListener,
    mut control: ItemReceiver,
    shutdown: CancellationToken,
    tag: Option<String>,
    out: ItemSender,
) -> Result<(), CoreError> {
    let connections = shutdown.child_token();
    let result = loop {
        tokio::select! {
            request = control.recv() => match request {
                None => break Err(CoreError::interrupted()),
                Some(request) => debug!("Ignoring control item {request}"),
            },
            _ = shutdown.cancelled() => break Err(CoreError::interrupted()),
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!("Accepted connection from {peer}");
                    let connection = Connection::new(stream, peer);
                    spawn_stage(
                        &common,
                        out.clone(),
                        receive(
                            connection,
                            tag.clone(),
                            connections.child_token(),
                            out.clone(),
                        ),
                    );
                }
                Err(e) if is_transient(&e) => warn!("Accept failed, retrying: {e}"),
                Err(e) => {
                    break Err(CoreError::new(
                        CoreErrorKind::ConnectionError,
                        &format!("accept failed: {e}"),
                    ));
                }
            },
        }
    };
    connections.cancel();
    result
}

fn is_transient(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::TimedOut
            | ErrorKind::WouldBlock
    )
}

async fn receive(
    mut connection: Connection<TcpStream>,
    tag: Option<String>,
    cancel: CancellationToken,
    out: ItemSender,
) -> Result<(), CoreError> {
    let mut received = 0usize;
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Stopped reading from {} after {received} items", connection.peer());
                return Ok(());
            }
            frame = connection.receive_frame() => frame?,
        };
        let Some(frame) = frame else {
            info!("{} closed the connection after {received} items", connection.peer());
            return Ok(());
        };
        let item = match &tag {
            Some(tag) => Item::raw(tag, frame),
            None => Item::from_wire(frame),
        };
        received += 1;
        if out.send(item).await.is_err() {
            return Ok(());
        }
    }
}

async fn transmit(
    common: &Common,
    connection: &mut Connection<TcpStream>,
    mut input: ItemReceiver,
    shutdown: CancellationToken,
) -> Result<(), CoreError> {
    let mut sent = 0usize;
    loop {
        let item = tokio::select! {
            _ = shutdown.cancelled() => return Err(CoreError::interrupted()),
            item = input.recv() => item,
        };
        let Some(item) = item else {
            debug!("Input drained after {sent} items to {}", connection.peer());
            return Ok(());
        };
        match connection.send_item(&item).await {
            Ok(()) => sent += 1,
            Err(e) if e.kind() == CoreErrorKind::FrameTooLarge => {
                warn!("Dropping {item}: {e}");
                common.set_error(e);
            }
            Err(e) => return Err(e),
        }
    }
}
