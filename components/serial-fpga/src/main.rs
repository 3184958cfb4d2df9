//! serial-fpga - host daemon for an HBA FPGA on a serial link
//!
//! Usage:
//! - `serial-fpga --port /dev/ttyUSB1 --intr-pin 17`
//! - `serial-fpga --config /etc/hba/serial-fpga.toml --trace-raw`

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;
use hba_platform::{Broadcaster, Reactor};
use hba_transport::SerialFpga;
use serial_fpga::{DaemonConfig, Overrides};

#[derive(Parser, Debug)]
#[command(name = "serial-fpga")]
#[command(version)]
#[command(about = "Drive an HBA FPGA over a serial link", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device (overrides the config file)
    #[arg(short, long)]
    port: Option<PathBuf>,

    /// Baud rate, one of 1200..921600 (overrides the config file)
    #[arg(short, long)]
    baud: Option<u32>,

    /// sysfs GPIO pin of the FPGA interrupt output
    #[arg(long = "intr-pin")]
    intr_pin: Option<u32>,

    /// Print bytes received outside of exchanges to stdout
    #[arg(long)]
    trace_raw: bool,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match daemon(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn daemon(args: Args) -> Result<()> {
    let mut config = DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply(&Overrides {
        port: args.port,
        baud: args.baud,
        interrupt_pin: args.intr_pin,
    })?;

    let transport_config = config.transport;
    log::info!("Configuration:");
    log::info!("  Port:          {}", transport_config.device.display());
    log::info!("  Baud:          {}", transport_config.baud);
    match transport_config.interrupt_pin {
        Some(pin) => log::info!("  Interrupt pin: gpio{}", pin),
        None => log::info!("  Interrupt pin: none"),
    }

    let reactor = Rc::new(Reactor::new());
    let broadcaster = Rc::new(Broadcaster::new());
    let transport = SerialFpga::open_system(transport_config, Rc::clone(&broadcaster));
    transport.attach(&reactor);

    let trace = args
        .trace_raw
        .then(|| broadcaster.subscribe(transport.rawin_key()));

    // Not fatal: the FPGA may be configured or powered later
    let _ = transport.probe();

    let stdout = io::stdout();
    let result = serial_fpga::run(&transport, &reactor, trace.as_ref(), &mut stdout.lock());
    transport.detach();
    result.context("Event loop stopped")
}
