// Simulated servo bus
//
// A `Transport` that behaves like a line with AX-12 devices hanging off it.
// Instruction bytes written by the driver are collected while the line is in
// transmit; when the driver turns the line around, the addressed devices
// execute the packet and their status reply is pushed into the capture sink,
// either immediately or from a worker thread after a delay.
//
// Replies can be disturbed with queued `Fault`s to exercise resynchronisation
// and checksum handling.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::bus::{
    Ax12Bus, ByteSink, CaptureBuffer, Direction, LineSettings, Route, Segment, Transport,
};
use crate::config::{BusConfig, CAPTURE_CAPACITY};
use crate::error::Result;
use crate::protocol::{BROADCAST_ID, HEADER, Instruction, StatusError, checksum, is_valid_checksum};

/// Size of the simulated control table
pub const CONTROL_TABLE_SIZE: usize = 50;

/// Control table offsets the simulator gives meaning to
pub const REG_MODEL_NUMBER: u8 = 0;
pub const REG_ID: u8 = 3;
pub const REG_BAUD_RATE: u8 = 4;
pub const REG_STATUS_RETURN_LEVEL: u8 = 16;

const AX12_MODEL_NUMBER: u16 = 12;

/// Gap between bytes of a delayed reply
const BYTE_GAP: Duration = Duration::from_micros(20);

/// Disturbance applied to the next reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Garbage on the line before the header
    LeadingNoise(Vec<u8>),
    /// Extra header marker where the id belongs
    DuplicateHeader,
    /// Flip the low bit of the byte at this index
    CorruptByte(usize),
    /// Only the first n bytes make it onto the line
    Truncate(usize),
    /// Device stays quiet
    Silent,
}

impl Fault {
    fn apply(&self, reply: &mut Vec<u8>) {
        match self {
            Fault::LeadingNoise(noise) => {
                let mut noisy = noise.clone();
                noisy.append(reply);
                *reply = noisy;
            }
            Fault::DuplicateHeader => reply.insert(2, HEADER[0]),
            Fault::CorruptByte(index) => {
                if let Some(byte) = reply.get_mut(*index) {
                    *byte ^= 0x01;
                }
            }
            Fault::Truncate(len) => reply.truncate(*len),
            Fault::Silent => reply.clear(),
        }
    }
}

/// One simulated device
#[derive(Debug, Clone)]
pub struct SimDevice {
    id: u8,
    segment: Segment,
    registers: [u8; CONTROL_TABLE_SIZE],
    factory: [u8; CONTROL_TABLE_SIZE],
    staged: Option<(u8, Vec<u8>)>,
    /// Error bits reported in every reply, e.g. to simulate overheating
    pub status: StatusError,
}

impl SimDevice {
    pub fn new(id: u8) -> Self {
        let mut registers = [0u8; CONTROL_TABLE_SIZE];
        let [lo, hi] = AX12_MODEL_NUMBER.to_le_bytes();
        registers[REG_MODEL_NUMBER as usize] = lo;
        registers[REG_MODEL_NUMBER as usize + 1] = hi;
        registers[REG_ID as usize] = id;
        registers[REG_BAUD_RATE as usize] = 1;
        registers[REG_STATUS_RETURN_LEVEL as usize] = 2;
        Self {
            id,
            segment: Segment::Primary,
            registers,
            factory: registers,
            staged: None,
            status: StatusError::NONE,
        }
    }

    pub fn on_segment(mut self, segment: Segment) -> Self {
        self.segment = segment;
        self
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }

    pub fn register(&self, offset: u8) -> u8 {
        self.registers.get(offset as usize).copied().unwrap_or(0)
    }

    pub fn set_register(&mut self, offset: u8, value: u8) {
        if let Some(slot) = self.registers.get_mut(offset as usize) {
            *slot = value;
        }
    }

    pub fn has_staged_write(&self) -> bool {
        self.staged.is_some()
    }

    fn status_return_level(&self) -> u8 {
        self.registers[REG_STATUS_RETURN_LEVEL as usize]
    }

    fn range(&self, offset: u8, len: usize) -> Option<std::ops::Range<usize>> {
        let start = offset as usize;
        let end = start.checked_add(len)?;
        (len > 0 && end <= CONTROL_TABLE_SIZE).then_some(start..end)
    }

    /// Run one instruction; returns the reply parameters and error bits,
    /// or None when the device would stay silent.
    fn execute(&mut self, instruction: u8, params: &[u8]) -> Option<(StatusError, Vec<u8>)> {
        let level = self.status_return_level();
        let Ok(instruction) = Instruction::try_from(instruction) else {
            return Some((self.status | StatusError::INSTRUCTION, Vec::new()));
        };

        match instruction {
            Instruction::Ping => Some((self.status, Vec::new())),
            Instruction::Read => {
                if level == 0 {
                    return None;
                }
                let (offset, len) = match params {
                    [offset, len] => (*offset, *len as usize),
                    _ => return Some((self.status | StatusError::INSTRUCTION, Vec::new())),
                };
                match self.range(offset, len) {
                    Some(range) => Some((self.status, self.registers[range].to_vec())),
                    None => Some((self.status | StatusError::RANGE, Vec::new())),
                }
            }
            Instruction::Write | Instruction::RegWrite => {
                let mut error = self.status;
                match params.split_first() {
                    Some((&offset, data)) if self.range(offset, data.len()).is_some() => {
                        if instruction == Instruction::Write {
                            self.store(offset, data);
                        } else {
                            self.staged = Some((offset, data.to_vec()));
                        }
                    }
                    _ => error = error | StatusError::RANGE,
                }
                (level >= 2).then(|| (error, Vec::new()))
            }
            Instruction::Action => {
                if let Some((offset, data)) = self.staged.take() {
                    self.store(offset, &data);
                }
                (level >= 2).then(|| (self.status, Vec::new()))
            }
            Instruction::Reset => {
                self.registers = self.factory;
                self.staged = None;
                None
            }
            Instruction::SyncWrite => Some((self.status | StatusError::INSTRUCTION, Vec::new())),
        }
    }

    fn store(&mut self, offset: u8, data: &[u8]) {
        if let Some(range) = self.range(offset, data.len()) {
            self.registers[range].copy_from_slice(data);
        }
    }
}

/// Status packet as a device would send it
pub fn status_packet(id: u8, error: StatusError, params: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(6 + params.len());
    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push((params.len() + 2) as u8);
    packet.push(error.bits());
    packet.extend_from_slice(params);
    let sum = checksum(&packet[2..]);
    packet.push(sum);
    packet
}

fn covers(route: Route, segment: Segment) -> bool {
    match route {
        Route::All => true,
        Route::Segment(s) => s == segment,
    }
}

pub struct SimulatedBus {
    sink: ByteSink,
    devices: BTreeMap<u8, SimDevice>,
    wire: Vec<u8>,
    direction: Direction,
    tx_route: Route,
    faults: VecDeque<Fault>,
    reply_delay: Option<Duration>,
    worker: Option<JoinHandle<()>>,
    settings: Option<LineSettings>,
    direction_log: Vec<(Direction, Route)>,
}

impl SimulatedBus {
    pub fn new(sink: ByteSink) -> Self {
        Self {
            sink,
            devices: BTreeMap::new(),
            wire: Vec::new(),
            direction: Direction::Receive,
            tx_route: Route::All,
            faults: VecDeque::new(),
            reply_delay: None,
            worker: None,
            settings: None,
            direction_log: Vec::new(),
        }
    }

    pub fn with_devices(sink: ByteSink, ids: &[u8]) -> Self {
        let mut sim = Self::new(sink);
        for &id in ids {
            sim.add_device(SimDevice::new(id));
        }
        sim
    }

    pub fn add_device(&mut self, device: SimDevice) {
        self.devices.insert(device.id(), device);
    }

    pub fn device(&self, id: u8) -> Option<&SimDevice> {
        self.devices.get(&id)
    }

    pub fn device_mut(&mut self, id: u8) -> Option<&mut SimDevice> {
        self.devices.get_mut(&id)
    }

    /// Queue a disturbance for the next reply
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    /// Deliver replies from a worker thread after `delay`
    pub fn set_reply_delay(&mut self, delay: Option<Duration>) {
        self.reply_delay = delay;
    }

    pub fn line_settings(&self) -> Option<LineSettings> {
        self.settings
    }

    /// Every direction change requested so far
    pub fn direction_log(&self) -> &[(Direction, Route)] {
        &self.direction_log
    }

    /// Wait for the reply thread of the previous cycle. A panic there means
    /// the line stopped delivering, which surfaces as an IO error.
    fn join_worker(&mut self) -> Result<()> {
        match self.worker.take().map(JoinHandle::join) {
            Some(Err(_)) => Err(io::Error::other("simulated reply thread panicked").into()),
            _ => Ok(()),
        }
    }

    /// The driver just released the line: act on what was transmitted.
    fn turnaround(&mut self, rx_route: Route) {
        let wire = std::mem::take(&mut self.wire);
        if wire.is_empty() {
            return;
        }

        let Some(reply) = self.respond(&wire) else {
            return;
        };
        let (segment, mut reply) = reply;
        if !covers(rx_route, segment) {
            trace!("Reply on {:?} not heard on {:?}", segment, rx_route);
            return;
        }
        if let Some(fault) = self.faults.pop_front() {
            debug!("Injecting {:?}", fault);
            fault.apply(&mut reply);
        }
        self.deliver(reply);
    }

    fn respond(&mut self, wire: &[u8]) -> Option<(Segment, Vec<u8>)> {
        // [FF FF id len instr params.. chk]
        if wire.len() < 6 || wire[..2] != HEADER {
            return None;
        }
        let id = wire[2];
        let len = wire[3] as usize;
        if wire.len() != len + 4 {
            return None;
        }
        let instruction = wire[4];
        let params = &wire[5..wire.len() - 1];
        let tx_route = self.tx_route;
        let valid = is_valid_checksum(wire);

        if id == BROADCAST_ID {
            if valid {
                for device in self.devices.values_mut() {
                    if covers(tx_route, device.segment) {
                        device.execute(instruction, params);
                    }
                }
            }
            return None;
        }

        let device = self.devices.get_mut(&id)?;
        if !covers(tx_route, device.segment) {
            return None;
        }
        if !valid {
            let error = device.status | StatusError::CHECKSUM;
            return Some((device.segment, status_packet(id, error, &[])));
        }
        let (error, data) = device.execute(instruction, params)?;
        Some((device.segment, status_packet(id, error, &data)))
    }

    fn deliver(&mut self, reply: Vec<u8>) {
        match self.reply_delay {
            None => {
                self.sink.extend(&reply);
            }
            Some(delay) => {
                let sink = self.sink.clone();
                self.worker = Some(thread::spawn(move || {
                    thread::sleep(delay);
                    for byte in reply {
                        sink.push(byte);
                        thread::sleep(BYTE_GAP);
                    }
                }));
            }
        }
    }
}

impl Transport for SimulatedBus {
    fn configure(&mut self, settings: &LineSettings) -> Result<()> {
        self.settings = Some(*settings);
        Ok(())
    }

    fn set_direction(&mut self, direction: Direction, route: Route) -> Result<()> {
        self.direction_log.push((direction, route));
        match direction {
            Direction::Transmit => {
                self.join_worker()?;
                self.wire.clear();
                self.tx_route = route;
            }
            Direction::Receive => self.turnaround(route),
        }
        self.direction = direction;
        Ok(())
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        if self.direction == Direction::Transmit {
            self.wire.push(byte);
        }
        Ok(())
    }

    fn wait_transmit_empty(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Drop for SimulatedBus {
    fn drop(&mut self) {
        if let Err(e) = self.join_worker() {
            warn!("{}", e);
        }
    }
}

/// Build a driver over a simulated line with one device per ID
pub fn simulated_bus(config: BusConfig, ids: &[u8]) -> Result<Ax12Bus<SimulatedBus>> {
    let capture = CaptureBuffer::new(CAPTURE_CAPACITY);
    let mut sim = SimulatedBus::new(capture.sink());
    for &id in ids {
        let segment = if config.secondary_segment.contains(&id) {
            Segment::Secondary
        } else {
            Segment::Primary
        };
        sim.add_device(SimDevice::new(id).on_segment(segment));
    }
    Ax12Bus::new(sim, Arc::clone(&capture), config)
}
