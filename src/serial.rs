// Serial-port transport for USB and RS-485 bus adapters
//
// A reader thread stands in for the receive interrupt: it pulls whatever the
// OS has buffered and pushes it byte by byte into the capture sink. The sink
// is only armed while the driver is listening, so anything read during
// transmit (including local echo) is discarded.
//
// Direction lines: RTS drives the primary segment, DTR the secondary one.
// Asserted means transmit.
//
// If the reader thread stops on an IO error, the error is kept and returned by
// the next write or turnaround instead of letting every later read time out.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::bus::{ByteSink, Direction, LineSettings, Route, Segment, Transport};
use crate::error::Result;

/// How long the reader thread blocks in one read before checking for shutdown
const READ_POLL: Duration = Duration::from_millis(5);

/// Why the reader thread stopped, if it has
#[derive(Debug, Default)]
struct ReaderHealth {
    failure: Mutex<Option<(ErrorKind, String)>>,
}

impl ReaderHealth {
    fn fail(&self, error: &io::Error) {
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        *failure = Some((error.kind(), error.to_string()));
    }

    fn check(&self) -> io::Result<()> {
        let failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        match &*failure {
            Some((kind, message)) => Err(io::Error::new(
                *kind,
                format!("serial receive stopped: {}", message),
            )),
            None => Ok(()),
        }
    }
}

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    shutdown: Arc<AtomicBool>,
    health: Arc<ReaderHealth>,
    reader: Option<JoinHandle<()>>,
}

impl SerialTransport {
    /// Open `port_name` and start feeding received bytes into `sink`
    pub fn open(port_name: &str, baudrate: u32, sink: ByteSink) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(READ_POLL)
            .open()?;
        info!("Opened serial port {} at {} baud", port_name, baudrate);

        let reader_port = port.try_clone()?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let health = Arc::new(ReaderHealth::default());
        let reader_health = Arc::clone(&health);
        let reader = thread::Builder::new()
            .name("ax12-rx".into())
            .spawn(move || receive_loop(reader_port, sink, stop, &reader_health))?;

        Ok(Self {
            port,
            shutdown,
            health,
            reader: Some(reader),
        })
    }

    /// Fails once the reader thread is gone; nothing would be captured.
    fn check_reader(&self) -> Result<()> {
        self.health.check()?;
        match &self.reader {
            Some(reader) if !reader.is_finished() => Ok(()),
            _ => Err(io::Error::other("serial reader thread exited").into()),
        }
    }

    fn drive(&mut self, segment: Segment, transmit: bool) -> Result<()> {
        match segment {
            Segment::Primary => self.port.write_request_to_send(transmit)?,
            Segment::Secondary => self.port.write_data_terminal_ready(transmit)?,
        }
        Ok(())
    }
}

fn receive_loop(
    mut port: Box<dyn SerialPort>,
    sink: ByteSink,
    shutdown: Arc<AtomicBool>,
    health: &ReaderHealth,
) {
    let mut buf = [0u8; 64];
    while !shutdown.load(Ordering::Acquire) {
        match port.read(&mut buf) {
            Ok(n) => {
                for &byte in &buf[..n] {
                    sink.push(byte);
                }
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("Serial receive stopped: {}", e);
                health.fail(&e);
                break;
            }
        }
    }
}

impl Transport for SerialTransport {
    fn configure(&mut self, settings: &LineSettings) -> Result<()> {
        // The OS driver derives its own divisor from the baud rate.
        debug!(
            "Line settings: {} baud (controller divisor {} unused)",
            settings.baudrate, settings.divisor
        );
        self.port.set_baud_rate(settings.baudrate)?;
        Ok(())
    }

    fn set_direction(&mut self, direction: Direction, route: Route) -> Result<()> {
        let transmit = direction == Direction::Transmit;
        match route {
            Route::Segment(segment) => self.drive(segment, transmit),
            Route::All => {
                self.drive(Segment::Primary, transmit)?;
                self.drive(Segment::Secondary, transmit)
            }
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.check_reader()?;
        self.port.write_all(&[byte])?;
        Ok(())
    }

    fn wait_transmit_empty(&mut self) -> Result<()> {
        self.port.flush()?;
        self.check_reader()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Serial reader thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_failure_is_kept() {
        let health = ReaderHealth::default();
        assert!(health.check().is_ok());

        health.fail(&io::Error::new(ErrorKind::BrokenPipe, "device unplugged"));
        let err = health.check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
        assert!(err.to_string().contains("device unplugged"));

        // Surfaces as a bus IO error, not a timeout.
        let bus_err = crate::error::BusError::from(err);
        assert!(matches!(bus_err, crate::error::BusError::Io(_)));
        assert!(!bus_err.is_no_reply());
    }
}
