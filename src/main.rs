//! Entry point of the tapwire binary.
//!
//! A client captures packets on a local interface and sends them to a remote server;
//! the server injects everything it receives into its own interface.

use crate::config::AppConfig;
use crate::error::AppError;
use clap::Parser;
use log::info;
use tapwire_device::list_devices;
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod run;

#[derive(Debug, Parser, Default)]
#[clap(ignore_errors = true)]
struct PreCli {
    /// Optional `.env` file path for loading environment variables.
    #[clap(short, long, value_name = "ENV_FILE")]
    env_file: Option<String>,
}

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Receive from the network and inject into the device.
    #[clap(short, long, env = "TAPWIRE_SERVER", action = clap::ArgAction::SetTrue)]
    server: bool,

    /// Peer to connect to, or the address to listen on with --server.
    #[clap(short, long, value_name = "ADDR", env = "TAPWIRE_ADDR")]
    addr: Option<String>,

    /// Port to connect to or listen on.
    #[clap(short, long, value_name = "PORT", env = "TAPWIRE_PORT")]
    port: Option<u16>,

    /// Network interface to capture from or inject into.
    #[clap(short, long, value_name = "DEVICE", env = "TAPWIRE_DEVICE")]
    device: Option<String>,

    /// BPF capture filter.
    #[clap(short, long, value_name = "FILTER", env = "TAPWIRE_FILTER")]
    filter: Option<String>,

    /// Compress items on the wire with LZ4.
    #[clap(short = 'z', long, env = "TAPWIRE_COMPRESS", action = clap::ArgAction::SetTrue)]
    compress: bool,

    /// Log a summary of every packet passing through.
    #[clap(short = 'D', long, env = "TAPWIRE_DEBUG", action = clap::ArgAction::SetTrue)]
    debug: bool,

    /// Count received packets instead of injecting them.
    #[clap(short, long, env = "TAPWIRE_TEST", action = clap::ArgAction::SetTrue)]
    test: bool,

    /// List network devices and exit.
    #[clap(short, long, action = clap::ArgAction::SetTrue)]
    list: bool,

    /// Optional settings file (TOML, YAML or JSON).
    #[clap(short, long, value_name = "CONFIG", env = "TAPWIRE_CONFIG")]
    config: Option<String>,

    /// Optional `.env` file path for loading environment variables.
    #[clap(short, long, value_name = "ENV_FILE")]
    env_file: Option<String>,

    /// Optional log level.
    #[clap(long, value_name = "LOG_LEVEL", env = "TAPWIRE_LOG_LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    /// Flags given on the command line win over the settings file.
    fn apply(&self, config: &mut AppConfig) {
        config.transport.server |= self.server;
        if let Some(addr) = &self.addr {
            config.transport.addr = addr.clone();
        }
        if let Some(port) = self.port {
            config.transport.port = port;
        }
        if let Some(device) = &self.device {
            config.capture.device = device.clone();
        }
        if let Some(filter) = &self.filter {
            config.capture.filter = filter.clone();
        }
        config.capture.test |= self.test;
        config.pipeline.compress |= self.compress;
        config.pipeline.debug |= self.debug;
        if let Some(log_level) = &self.log_level {
            config.log_level = log_level.clone();
        }
    }
}

fn print_devices() -> Result<(), AppError> {
    for device in list_devices()? {
        let description = device.desc.as_deref().unwrap_or("");
        println!("{} {}", device.name, description);
        for address in &device.addresses {
            match address.netmask {
                Some(netmask) => println!("    {} netmask {}", address.addr, netmask),
                None => println!("    {}", address.addr),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let pre = PreCli::try_parse().unwrap_or_default();

    if let Some(env_file) = pre.env_file {
        dotenvy::from_filename(env_file).expect("failed to load .env file");
    } else {
        dotenvy::dotenv().ok();
    }

    let cli = Cli::parse();
    let mut config = AppConfig::parse_config(cli.config.as_deref())?;
    cli.apply(&mut config);

    let level = &config.log_level;
    let env = EnvFilter::new(format!(
        "tapwire={level},tapwire_core={level},tapwire_transport={level},\
         tapwire_device={level},tapwire_pipes={level},info"
    ));
    let timer = tracing_subscriber::fmt::time::LocalTime::rfc_3339();
    tracing_subscriber::fmt()
        .with_timer(timer)
        .with_target(true)
        .with_env_filter(env)
        .init();

    if cli.list {
        return print_devices();
    }

    info!(
        "Starting tapwire {} on {}",
        if config.transport.server { "server" } else { "client" },
        config.capture.device
    );
    run::run(&config).await
}
