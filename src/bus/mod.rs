// Half-duplex protocol engine
//
// Provides:
// - Reply capture buffer fed from the receive context
// - Transport trait for the direction lines and transmit register
// - Segment routing for split buses
// - The bus driver: turnaround, framing and register access

pub mod capture;
mod driver;
pub mod segments;
pub mod timing;
pub mod transport;

pub use capture::{ByteSink, CaptureBuffer};
pub use driver::Ax12Bus;
pub use segments::{Segment, SegmentMap};
pub use transport::{Direction, LineSettings, Route, Transport};
