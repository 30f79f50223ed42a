// Hardware seam for the half-duplex line
//
// The driver owns turnaround timing and framing; a transport only moves bytes
// and flips the direction/segment lines. Received bytes do not come back
// through this trait: the transport feeds them into the `ByteSink` it was
// built with, from whatever context the hardware delivers them in.

use super::segments::Segment;
use crate::error::Result;

/// Electrical state of the shared line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Transmit,
    Receive,
}

/// Which physical segment(s) of a split bus a direction change applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Segment(Segment),
    All,
}

/// Line speed as handed to the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSettings {
    pub baudrate: u32,
    /// Baud generator divisor for clock-divided UARTs
    pub divisor: u16,
    /// Double-speed (8x oversampling) mode
    pub double_speed: bool,
}

pub trait Transport {
    /// Apply line settings. Called once when the bus is opened.
    fn configure(&mut self, settings: &LineSettings) -> Result<()>;

    /// Drive the direction line(s) for `route`. Receive-enable is handled
    /// by the driver through the capture buffer.
    fn set_direction(&mut self, direction: Direction, route: Route) -> Result<()>;

    /// Block until the transmit holding register is free, then load `byte`.
    fn write_byte(&mut self, byte: u8) -> Result<()>;

    /// Block until the last written byte has left the holding register.
    fn wait_transmit_empty(&mut self) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn configure(&mut self, settings: &LineSettings) -> Result<()> {
        (**self).configure(settings)
    }

    fn set_direction(&mut self, direction: Direction, route: Route) -> Result<()> {
        (**self).set_direction(direction, route)
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        (**self).write_byte(byte)
    }

    fn wait_transmit_empty(&mut self) -> Result<()> {
        (**self).wait_transmit_empty()
    }
}
