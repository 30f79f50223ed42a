// AX-12 bus driver
//
// One instance per physical half-duplex line. Every public operation is a full
// transmit-then-optionally-receive cycle:
//   set_transmit -> send_packet -> set_receive -> [read_packet]
// There is no queuing; a call returns once its cycle is over.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use super::capture::CaptureBuffer;
use super::segments::SegmentMap;
use super::timing::{spin_for, spin_until};
use super::transport::{Direction, Route, Transport};
use crate::config::{BusConfig, WriteReplyPolicy};
use crate::error::{BusError, Result};
use crate::protocol::{
    BROADCAST_ID, FrameSync, Instruction, PACKET_OVERHEAD, StatusError, SyncState, encode_packet,
};

/// Status packet byte positions
const STATUS_ID: usize = 2;
const STATUS_ERROR: usize = 4;
const STATUS_PARAMS: usize = 5;

pub struct Ax12Bus<T: Transport> {
    transport: T,
    capture: Arc<CaptureBuffer>,
    segments: SegmentMap,
    config: BusConfig,
    // Device addressed by the cycle in flight
    target: u8,
    last_error: Option<StatusError>,
    tx_log: Vec<u8>,
    rx_frame: Vec<u8>,
}

impl<T: Transport> Ax12Bus<T> {
    /// Configure the line and leave the bus listening.
    ///
    /// `capture` must be the buffer whose sink the transport feeds.
    pub fn new(mut transport: T, capture: Arc<CaptureBuffer>, config: BusConfig) -> Result<Self> {
        config.validate()?;
        let settings = config.line_settings();
        transport.configure(&settings)?;
        info!(
            "Bus configured: {} baud (divisor {}), settle {:?}, byte timeout {:?}",
            settings.baudrate,
            settings.divisor,
            config.settle_delay(),
            config.byte_timeout()
        );

        let segments = SegmentMap::with_secondary(&config.secondary_segment);
        if segments.is_split() {
            info!("Split bus: IDs {:?} on secondary segment", config.secondary_segment);
        }

        let mut bus = Self {
            transport,
            capture,
            segments,
            config,
            target: 0,
            last_error: None,
            tx_log: Vec::new(),
            rx_frame: Vec::new(),
        };
        bus.set_receive(BROADCAST_ID)?;
        Ok(bus)
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Status byte of the most recent successfully decoded reply.
    /// `None` until the first one; failed cycles leave it untouched.
    pub fn last_error(&self) -> Option<StatusError> {
        self.last_error
    }

    /// Bytes of the most recent instruction packet
    pub fn last_transmitted(&self) -> &[u8] {
        &self.tx_log
    }

    /// Most recent checksum-valid status frame
    pub fn last_frame(&self) -> &[u8] {
        &self.rx_frame
    }

    // === Bus direction ===

    /// Disable receive, rewind the capture buffer and drive the line for `id`.
    pub fn set_transmit(&mut self, id: u8) -> Result<()> {
        if id == BROADCAST_ID {
            return self.set_transmit_all();
        }
        self.begin_transmit(id, self.segments.route(id))
    }

    /// Drive every segment; used for broadcast instructions.
    pub fn set_transmit_all(&mut self) -> Result<()> {
        self.begin_transmit(BROADCAST_ID, Route::All)
    }

    fn begin_transmit(&mut self, id: u8, route: Route) -> Result<()> {
        trace!("Bus -> transmit ({:?})", route);
        self.capture.disarm_and_rewind();
        self.tx_log.clear();
        self.target = id;
        self.transport.set_direction(Direction::Transmit, route)
    }

    /// Wait for the last byte to leave, hold for the settle interval, then
    /// release the line and start capturing.
    pub fn set_receive(&mut self, id: u8) -> Result<()> {
        self.transport.wait_transmit_empty()?;
        spin_for(self.config.settle_delay());
        let route = self.segments.route(id);
        trace!("Bus -> receive ({:?})", route);
        self.capture.rewind_and_arm();
        self.transport.set_direction(Direction::Receive, route)
    }

    // === Framing ===

    /// Write one instruction packet to the line. The bus must already be
    /// in transmit mode.
    pub fn send_packet(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<()> {
        let packet = encode_packet(id, instruction, params)?;
        debug!("TX {:?} to {}: {:02X?}", instruction, id, packet);
        for &byte in &packet {
            self.transport.write_byte(byte)?;
            self.tx_log.push(byte);
        }
        Ok(())
    }

    /// Assemble `expected_len` bytes from the capture buffer, skipping leading
    /// noise and a duplicated header, then validate the checksum.
    ///
    /// Each byte gets the configured budget; running out on any byte is a
    /// timeout and no partial frame is returned. Lengths that cannot fit the
    /// capture buffer are refused before waiting.
    pub fn read_packet(&mut self, expected_len: usize) -> Result<&[u8]> {
        let id = self.target;
        let timeout = self.config.byte_timeout();
        let mut sync = FrameSync::new(expected_len)
            .filter(|_| expected_len <= self.capture.capacity())
            .ok_or(BusError::InvalidLength { len: expected_len })?;

        while sync.state() != SyncState::Done {
            let index = sync.next_index();
            let capture = &self.capture;
            if !spin_until(timeout, || capture.available() > index) {
                debug!(
                    "Timeout on device {} after {} byte(s): {:02X?}",
                    id,
                    sync.frame().len(),
                    capture.snapshot()
                );
                return Err(BusError::Timeout { id });
            }
            if let Some(byte) = capture.get(index) {
                sync.push(byte);
            }
        }

        if !sync.is_valid() {
            warn!("Checksum mismatch from device {}: {:02X?}", id, sync.frame());
            return Err(BusError::ChecksumMismatch { id });
        }
        if sync.skipped() > 0 {
            debug!("Resynchronised past {} noise byte(s)", sync.skipped());
        }

        self.rx_frame.clear();
        self.rx_frame.extend_from_slice(sync.frame());
        debug!("RX from {}: {:02X?}", id, self.rx_frame);
        Ok(&self.rx_frame)
    }

    /// One full transmit cycle, ending with the bus listening.
    fn transmit(&mut self, id: u8, instruction: Instruction, params: &[u8]) -> Result<()> {
        if id == BROADCAST_ID && instruction.expects_reply() {
            return Err(BusError::BroadcastRead);
        }
        self.set_transmit(id)?;
        self.send_packet(id, instruction, params)?;
        self.set_receive(id)
    }

    /// Read a status packet carrying `payload` value bytes, check its id and
    /// record its error byte.
    fn read_status(&mut self, id: u8, payload: usize) -> Result<&[u8]> {
        self.read_packet(PACKET_OVERHEAD + payload)?;
        let got = self.rx_frame[STATUS_ID];
        if got != id {
            warn!("Expected reply from {}, got {}", id, got);
            return Err(BusError::UnexpectedId { expected: id, got });
        }
        let status = StatusError::from(self.rx_frame[STATUS_ERROR]);
        if !status.is_empty() {
            debug!("Device {} reports: {}", id, status);
        }
        self.last_error = Some(status);
        Ok(&self.rx_frame[STATUS_PARAMS..STATUS_PARAMS + payload])
    }

    // === Register access ===

    /// Read a 1- or 2-byte register (2-byte values are little-endian)
    pub fn read_register(&mut self, id: u8, offset: u8, width: u8) -> Result<u16> {
        check_width(width)?;
        self.transmit(id, Instruction::Read, &[offset, width])?;
        let payload = self.read_status(id, width as usize)?;
        match *payload {
            [lo] => Ok(u16::from(lo)),
            [lo, hi] => Ok(u16::from_le_bytes([lo, hi])),
            _ => Err(BusError::InvalidWidth { width }),
        }
    }

    /// Write a 1- or 2-byte register. For width 1 only the low byte of
    /// `value` is sent.
    ///
    /// Whether a reply is read back follows [`WriteReplyPolicy`].
    pub fn write_register(&mut self, id: u8, offset: u8, value: u16, width: u8) -> Result<()> {
        let params = register_params(offset, value, width)?;
        self.transmit(id, Instruction::Write, &params)?;
        self.finish_write(id)
    }

    /// Stage a register write to be applied by [`commit`](Self::commit).
    pub fn deferred_write(&mut self, id: u8, offset: u8, value: u16, width: u8) -> Result<()> {
        let params = register_params(offset, value, width)?;
        self.transmit(id, Instruction::RegWrite, &params)?;
        self.finish_write(id)
    }

    /// Apply staged writes. Usually sent to the broadcast ID so that every
    /// device moves at once.
    pub fn commit(&mut self, id: u8) -> Result<()> {
        self.transmit(id, Instruction::Action, &[])
    }

    /// Check that a device answers. The reply's error byte becomes
    /// [`last_error`](Self::last_error).
    pub fn ping(&mut self, id: u8) -> Result<()> {
        self.transmit(id, Instruction::Ping, &[])?;
        self.read_status(id, 0)?;
        Ok(())
    }

    /// Restore factory defaults (including ID 1 and the factory baud rate).
    /// No reply is read.
    pub fn reset(&mut self, id: u8) -> Result<()> {
        self.transmit(id, Instruction::Reset, &[])
    }

    fn finish_write(&mut self, id: u8) -> Result<()> {
        match self.config.write_reply {
            WriteReplyPolicy::Await if id != BROADCAST_ID => {
                self.read_status(id, 0)?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // === Typed helpers ===

    pub fn read_u8(&mut self, id: u8, offset: u8) -> Result<u8> {
        self.read_register(id, offset, 1).map(|v| v as u8)
    }

    pub fn read_u16(&mut self, id: u8, offset: u8) -> Result<u16> {
        self.read_register(id, offset, 2)
    }

    pub fn write_u8(&mut self, id: u8, offset: u8, value: u8) -> Result<()> {
        self.write_register(id, offset, u16::from(value), 1)
    }

    pub fn write_u16(&mut self, id: u8, offset: u8, value: u16) -> Result<()> {
        self.write_register(id, offset, value, 2)
    }
}

fn check_width(width: u8) -> Result<()> {
    match width {
        1 | 2 => Ok(()),
        _ => Err(BusError::InvalidWidth { width }),
    }
}

/// [offset, value_lo] or [offset, value_lo, value_hi]
fn register_params(offset: u8, value: u16, width: u8) -> Result<Vec<u8>> {
    check_width(width)?;
    let [lo, hi] = value.to_le_bytes();
    let mut params = vec![offset, lo];
    if width == 2 {
        params.push(hi);
    }
    Ok(params)
}
