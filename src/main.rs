use std::path::PathBuf;
use std::sync::Arc;

use ax12_bus::bus::Transport;
use ax12_bus::config::CAPTURE_CAPACITY;
use ax12_bus::sim::SimulatedBus;
use ax12_bus::{Ax12Bus, BROADCAST_ID, BusConfig, CaptureBuffer, SerialTransport};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

// Devices present on the --simulate bus
const SIMULATED_IDS: [u8; 6] = [1, 2, 3, 4, 5, 6];

#[derive(Debug, Parser)]
#[command(name = "ax12", version, about = "Talk to AX-12 servos on a half-duplex bus")]
struct Cli {
    /// Serial port of the bus adapter
    #[arg(short, long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Line speed (overrides the config file)
    #[arg(short, long)]
    baud: Option<u32>,

    /// JSON bus configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use a simulated bus with devices 1-6 instead of a serial port
    #[arg(long)]
    simulate: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that a device answers
    Ping { id: u8 },
    /// Read a 1- or 2-byte register
    Read {
        id: u8,
        offset: u8,
        #[arg(default_value_t = 1)]
        width: u8,
    },
    /// Write a register immediately
    Write {
        id: u8,
        offset: u8,
        value: u16,
        #[arg(short, long, default_value_t = 1)]
        width: u8,
    },
    /// Stage a register write until the next action
    RegWrite {
        id: u8,
        offset: u8,
        value: u16,
        #[arg(short, long, default_value_t = 1)]
        width: u8,
    },
    /// Apply staged writes (broadcast by default)
    Action {
        #[arg(default_value_t = BROADCAST_ID)]
        id: u8,
    },
    /// Restore factory defaults
    Reset { id: u8 },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .init();

    let mut config = match &cli.config {
        Some(path) => BusConfig::from_json_file(path)?,
        None => BusConfig::default(),
    };
    if let Some(baud) = cli.baud {
        config.baudrate = baud;
    }

    let capture = CaptureBuffer::new(CAPTURE_CAPACITY);
    let transport: Box<dyn Transport> = if cli.simulate {
        Box::new(SimulatedBus::with_devices(capture.sink(), &SIMULATED_IDS))
    } else {
        Box::new(SerialTransport::open(&cli.port, config.baudrate, capture.sink())?)
    };
    let mut bus = Ax12Bus::new(transport, Arc::clone(&capture), config)?;

    match cli.command {
        Command::Ping { id } => {
            bus.ping(id)?;
            println!("Device {} responding", id);
            report_status(&bus);
        }
        Command::Read { id, offset, width } => {
            let value = bus.read_register(id, offset, width)?;
            println!(
                "Device {} register {} = {} (0x{:0w$X})",
                id,
                offset,
                value,
                value,
                w = width as usize * 2
            );
            report_status(&bus);
        }
        Command::Write { id, offset, value, width } => {
            bus.write_register(id, offset, value, width)?;
            println!("Wrote {} to device {} register {}", value, id, offset);
        }
        Command::RegWrite { id, offset, value, width } => {
            bus.deferred_write(id, offset, value, width)?;
            println!("Staged {} for device {} register {}", value, id, offset);
        }
        Command::Action { id } => {
            bus.commit(id)?;
            println!("Action sent to {}", id);
        }
        Command::Reset { id } => {
            bus.reset(id)?;
            println!("Reset sent to {}", id);
        }
    }

    Ok(())
}

fn report_status<T: Transport>(bus: &Ax12Bus<T>) {
    if let Some(status) = bus.last_error() {
        println!("Status: {}", status);
    }
}
