// Half-duplex driver for AX-12 style bus servos
//
// Provides:
// - Dynamixel Protocol 1.0 packet encoding and status decoding
// - Bus turnaround, reply capture and resynchronising frame receiver
// - Register read/write, deferred write + commit, ping and reset
// - Serial-port and simulated transports

pub mod bus;
pub mod config;
pub mod error;
pub mod protocol;
pub mod serial;
pub mod sim;

pub use bus::{Ax12Bus, ByteSink, CaptureBuffer, Transport};
pub use config::{BusConfig, WriteReplyPolicy};
pub use error::{BusError, Result};
pub use protocol::{BROADCAST_ID, Instruction, StatusError};
pub use serial::SerialTransport;
