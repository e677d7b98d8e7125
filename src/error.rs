use std::fmt::Debug;
use std::net::AddrParseError;
use tapwire_core::error::CoreError;
use thiserror::Error;

#[derive(Error, Clone)]
pub enum AppError {
    #[error("CoreError -> {0}")]
    CoreError(CoreError),
    #[error("config error: {0}")]
    ConfigError(String),
    #[error("argument error: {0}")]
    ArgumentError(String),
    #[error("I/O error: {0}")]
    IoError(String),
}

impl Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{0}", self)
    }
}

impl From<CoreError> for AppError {
    fn from(value: CoreError) -> Self {
        Self::CoreError(value)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        Self::ConfigError(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

impl From<AddrParseError> for AppError {
    fn from(e: AddrParseError) -> Self {
        Self::ArgumentError(e.to_string())
    }
}
