//! `mni` command-line runner.
//!
//! Runs one end of the master-node link over a serial device, or both ends
//! in-process over a loopback wire.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::{Parser, Subcommand};
use mni_protocol::{MniError, Port, Transport};
use mni_runner::capability::{parameter_key, RECHARGE_PREFIX, VOLUME_PREFIX};
use mni_runner::{
    Capabilities, ConfigError, DriverError, LinkConfig, MasterDriver, MemoryCapabilities,
    NodeDriver,
};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mni", version, about = "Master-node serial link runner")]
struct Cli {
    /// Link configuration file (YAML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial endpoint, overriding the config.
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Baud rate, overriding the config.
    #[arg(long, global = true)]
    baud: Option<u32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send requests as the master and print the node's volumes.
    Master {
        /// User issuing the request.
        #[arg(long)]
        user: String,
        /// PIN for the user.
        #[arg(long)]
        pin: String,
        /// Number of exchanges to run.
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Answer requests as the node until interrupted.
    Node,
    /// Run master and node in-process over a loopback wire.
    Loopback {
        /// Number of exchanges to run.
        #[arg(long, default_value_t = 3)]
        count: u32,
    },
}

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Link(#[from] MniError),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    mni_metrics::describe_metrics();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RunError> {
    let config = match &cli.config {
        Some(path) => LinkConfig::from_file(path)?,
        None => LinkConfig::default(),
    }
    .with_overrides(cli.endpoint, cli.baud);
    config.validate()?;

    match cli.command {
        Command::Master { user, pin, count } => {
            let transport = open_transport(&config)?;
            let caps = MemoryCapabilities::from_config(&config);
            let mut master = MasterDriver::new(transport, caps, config.poll_budget);
            for _ in 0..count {
                master.request(&user, &pin)?;
                let report = loop {
                    if let Some(report) = master.tick()? {
                        break report;
                    }
                    thread::sleep(config.tick_interval());
                };
                println!("volumes: {:?} ({} polls)", report.volumes, report.polls);
            }
            Ok(())
        }
        Command::Node => {
            let transport = open_transport(&config)?;
            let caps = MemoryCapabilities::from_config(&config);
            let mut node = NodeDriver::new(config.generation, transport, caps);
            let running = stop_flag();
            info!("Node: serving {} ({:?} generation)", config.endpoint, config.generation);
            while running.load(Ordering::SeqCst) {
                match node.tick() {
                    Ok(Some(reply)) => info!("Node: answered request, recharges {:?}", reply.recharges),
                    Ok(None) => {}
                    Err(DriverError::UnexpectedOpcode { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
                thread::sleep(config.tick_interval());
            }
            info!("Node: stopped");
            Ok(())
        }
        Command::Loopback { count } => run_loopback(&config, count),
    }
}

/// Both ends in one thread, ticking alternately like two cooperative loops.
fn run_loopback(config: &LinkConfig, count: u32) -> Result<(), RunError> {
    let (m, n) = Transport::loopback_pair();

    let mut master_caps = MemoryCapabilities::from_config(config).with_user("demo", "0000");
    let mut node_caps = MemoryCapabilities::from_config(config);
    for (i, (recharge, volume)) in [(100, 500), (0, 1200), (50, 75)].into_iter().enumerate() {
        let recharge_key = parameter_key(RECHARGE_PREFIX, i + 1);
        if master_caps.fetch_parameter(&recharge_key).is_none() {
            master_caps.persist_parameter(&recharge_key, recharge);
        }
        let volume_key = parameter_key(VOLUME_PREFIX, i + 1);
        if node_caps.fetch_parameter(&volume_key).is_none() {
            node_caps.persist_parameter(&volume_key, volume);
        }
    }

    let mut master = MasterDriver::new(m, master_caps, config.poll_budget);
    let mut node = NodeDriver::new(config.generation, n, node_caps);

    for exchange in 1..=count {
        master.request("demo", "0000")?;
        let report = loop {
            node.tick()?;
            if let Some(report) = master.tick()? {
                break report;
            }
        };
        println!(
            "exchange {}: volumes {:?} ({} polls)",
            exchange, report.volumes, report.polls
        );
    }
    Ok(())
}

#[cfg(feature = "serial")]
fn open_transport(config: &LinkConfig) -> Result<Transport<Box<dyn Port>>, MniError> {
    let device = mni_protocol::SerialDevice::open(&config.endpoint, config.baud_rate)?;
    info!("opened {} at {} baud (8N1)", config.endpoint, config.baud_rate);
    Transport::new(Box::new(device) as Box<dyn Port>, config.endpoint.clone(), config.baud_rate)
}

#[cfg(not(feature = "serial"))]
fn open_transport(config: &LinkConfig) -> Result<Transport<Box<dyn Port>>, MniError> {
    Err(MniError::open(
        config.endpoint.clone(),
        "built without serial support",
    ))
}

/// Flag cleared by Ctrl-C.
fn stop_flag() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst)) {
        warn!("could not install Ctrl-C handler: {}", e);
    }
    running
}
