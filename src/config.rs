use crate::error::AppError;
use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tapwire_device::CaptureOptions;
use tapwire_device::capture::{DEFAULT_FILTER, DEFAULT_SNAPLEN};

pub const DEFAULT_PORT: u16 = 6060;
pub const DEFAULT_DEVICE: &str = "eth0";

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct TransportConfig {
    /// Listen for a peer instead of dialing one.
    #[serde(default)]
    pub server: bool,
    /// Peer to dial, or the address to listen on in server mode (all interfaces when empty).
    #[serde(default)]
    pub addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct CaptureConfig {
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub promiscuous: bool,
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Count packets instead of injecting them.
    #[serde(default)]
    pub test: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub debug: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_device() -> String {
    DEFAULT_DEVICE.to_string()
}

fn default_filter() -> String {
    DEFAULT_FILTER.to_string()
}

fn default_snaplen() -> i32 {
    DEFAULT_SNAPLEN
}

fn default_timeout_ms() -> u64 {
    1000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            server: false,
            addr: String::new(),
            port: default_port(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            filter: default_filter(),
            promiscuous: false,
            snaplen: default_snaplen(),
            timeout_ms: default_timeout_ms(),
            test: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            transport: TransportConfig::default(),
            capture: CaptureConfig::default(),
            pipeline: PipelineConfig::default(),
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("TAPWIRE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl AppConfig {
    /// Reads the optional settings file, then `TAPWIRE_`-prefixed variables
    /// (`TAPWIRE_TRANSPORT__PORT` sets `transport.port`).
    pub fn parse_config(settings_path: Option<&str>) -> Result<AppConfig, AppError> {
        let mut builder = Config::builder();
        if let Some(settings_path) = settings_path {
            builder = builder.add_source(config::File::with_name(settings_path));
        }
        let settings = builder.add_source(environment()).build()?;

        let config = settings.try_deserialize::<AppConfig>()?;

        Ok(config)
    }

    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            promiscuous: self.capture.promiscuous,
            snaplen: self.capture.snaplen,
            timeout: Duration::from_millis(self.capture.timeout_ms),
            filter: (!self.capture.filter.is_empty()).then(|| self.capture.filter.clone()),
        }
    }
}
