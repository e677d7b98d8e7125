use std::error::Error;
use std::fmt::{Display, Formatter};
use std::net::AddrParseError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CoreErrorKind {
    #[error("no reader or writer")]
    NoReaderOrWriter,
    #[error("pipeline not supported")]
    PipelineNotSupported,
    #[error("adapter read not implemented")]
    ReadNotImplemented,
    #[error("adapter write not implemented")]
    WriteNotImplemented,
    #[error("pipe convert not implemented")]
    ConvertNotImplemented,
    #[error("pipe revert not implemented")]
    RevertNotImplemented,
    #[error("adapter not initialized")]
    NotInitialized,
    #[error("could not activate")]
    ActivationError,
    #[error("reader not supported for client")]
    ReaderNotSupported,
    #[error("writer not supported for server")]
    WriterNotSupported,
    #[error("invalid address")]
    InvalidAddress,
    #[error("port already in use")]
    PortInUse,
    #[error("connection error")]
    ConnectionError,
    #[error("connection reset")]
    ConnectionReset,
    #[error("could not read from network")]
    ReadError,
    #[error("could not write to network")]
    WriteError,
    #[error("frame too large")]
    FrameTooLarge,
    #[error("I/O error from Tokio")]
    IoError,
    #[error("capture error")]
    CaptureError,
    #[error("packet could not be constructed")]
    PacketConstructionError,
    #[error("could not decompress")]
    DecompressError,
    #[error("stage panicked")]
    StagePanicked,
    #[error("tokio task error")]
    TaskError,
    #[error("input closed")]
    InputClosed,
    #[error("interrupted")]
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreError {
    pub error_kind: CoreErrorKind,
    pub message: String,
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "Core Error: {}", self.error_kind)
        } else {
            write!(f, "Core Error: {}: {}", self.error_kind, self.message)
        }
    }
}

impl Error for CoreError {}

impl CoreError {
    pub fn new(error_kind: CoreErrorKind, message: &str) -> Self {
        Self {
            error_kind,
            message: message.to_owned(),
        }
    }

    pub fn input_closed() -> Self {
        Self::new(CoreErrorKind::InputClosed, "")
    }

    pub fn interrupted() -> Self {
        Self::new(CoreErrorKind::Interrupted, "")
    }

    pub fn kind(&self) -> CoreErrorKind {
        self.error_kind
    }

    /// `InputClosed` and `Interrupted` describe a normal shutdown.
    pub fn is_fault(&self) -> bool {
        !matches!(
            self.error_kind,
            CoreErrorKind::InputClosed | CoreErrorKind::Interrupted
        )
    }
}

impl From<std::io::Error> for CoreError {
    fn from(value: std::io::Error) -> Self {
        Self::new(CoreErrorKind::IoError, value.to_string().as_str())
    }
}

impl From<AddrParseError> for CoreError {
    fn from(value: AddrParseError) -> Self {
        Self::new(CoreErrorKind::InvalidAddress, value.to_string().as_str())
    }
}

impl From<tokio::task::JoinError> for CoreError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::new(CoreErrorKind::TaskError, value.to_string().as_str())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for CoreError {
    fn from(value: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::new(CoreErrorKind::InputClosed, value.to_string().as_str())
    }
}
