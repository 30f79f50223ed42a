// Reply capture buffer
//
// A non-wrapping, append-only byte log shared between exactly one producer (the
// receive interrupt, or a reader thread standing in for it) and one consumer
// (the frame receiver). The producer stores the byte and then publishes the new
// length with Release; the consumer reads the length with Acquire and only ever
// touches indices below it.
//
// Length, armed flag and a rewind generation share one atomic word. The
// producer publishes with a compare-exchange against the word it observed, so
// a byte pushed in one cycle can never be published into the next.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

const LEN_MASK: usize = 0xFFFF;
const ARMED: usize = LEN_MASK + 1;
const GENERATION_SHIFT: u32 = 17;

/// Snapshot of the shared length word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct State(usize);

impl State {
    fn len(self) -> usize {
        self.0 & LEN_MASK
    }

    fn is_armed(self) -> bool {
        self.0 & ARMED != 0
    }

    fn with_len(self, len: usize) -> State {
        State((self.0 & !LEN_MASK) | len)
    }

    /// Next generation, empty
    fn rewound(self, armed: bool) -> State {
        let generation = (self.0 >> GENERATION_SHIFT).wrapping_add(1);
        State((generation << GENERATION_SHIFT) | if armed { ARMED } else { 0 })
    }
}

pub struct CaptureBuffer {
    slots: Box<[AtomicU8]>,
    state: AtomicUsize,
    dropped: AtomicUsize,
}

impl CaptureBuffer {
    /// Capacities beyond 65535 bytes are clamped.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: (0..capacity.min(LEN_MASK)).map(|_| AtomicU8::new(0)).collect(),
            state: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        })
    }

    /// Producer handle for the receive path
    pub fn sink(self: &Arc<Self>) -> ByteSink {
        ByteSink {
            buffer: Arc::clone(self),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn state(&self) -> State {
        State(self.state.load(Ordering::Acquire))
    }

    /// Bytes published so far in this cycle
    pub fn available(&self) -> usize {
        self.state().len()
    }

    /// Byte at `index`, if it has been published
    pub fn get(&self, index: usize) -> Option<u8> {
        if index < self.available() {
            Some(self.slots[index].load(Ordering::Relaxed))
        } else {
            None
        }
    }

    /// Copy of everything published so far
    pub fn snapshot(&self) -> Vec<u8> {
        let len = self.available();
        self.slots[..len]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect()
    }

    /// Bytes lost because the sink was full, since the last rewind
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn rewind(&self, armed: bool) {
        self.dropped.store(0, Ordering::Relaxed);
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let next = State(current).rewound(armed).0;
            match self
                .state
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    /// Stop accepting bytes and rewind to the start.
    pub(crate) fn disarm_and_rewind(&self) {
        self.rewind(false);
    }

    /// Rewind and start accepting bytes.
    pub(crate) fn rewind_and_arm(&self) {
        self.rewind(true);
    }

    /// Store `byte` after the length seen in `observed` and publish it, unless
    /// the buffer was rewound or disarmed in the meantime.
    fn publish(&self, observed: State, byte: u8) -> bool {
        if !observed.is_armed() {
            return false;
        }
        let index = observed.len();
        if index >= self.slots.len() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.slots[index].store(byte, Ordering::Relaxed);
        self.state
            .compare_exchange(
                observed.0,
                observed.with_len(index + 1).0,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_ok()
    }
}

/// Producer side of a [`CaptureBuffer`]
///
/// Must only be driven from one context at a time.
#[derive(Clone)]
pub struct ByteSink {
    buffer: Arc<CaptureBuffer>,
}

impl ByteSink {
    /// Append one received byte. Returns false if the byte was discarded
    /// because the receiver is disarmed, the buffer is full, or a rewind
    /// happened while the byte was being stored.
    pub fn push(&self, byte: u8) -> bool {
        let buffer = &self.buffer;
        buffer.publish(buffer.state(), byte)
    }

    pub fn extend(&self, bytes: &[u8]) -> usize {
        bytes.iter().take_while(|&&b| self.push(b)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_disarmed_sink_drops() {
        let buffer = CaptureBuffer::new(8);
        let sink = buffer.sink();
        assert!(!sink.push(0x12));
        assert_eq!(buffer.available(), 0);
    }

    #[test]
    fn test_push_and_rewind() {
        let buffer = CaptureBuffer::new(8);
        let sink = buffer.sink();
        buffer.rewind_and_arm();
        assert_eq!(sink.extend(&[1, 2, 3]), 3);
        assert_eq!(buffer.available(), 3);
        assert_eq!(buffer.get(1), Some(2));
        assert_eq!(buffer.get(3), None);

        buffer.disarm_and_rewind();
        assert_eq!(buffer.available(), 0);
        assert!(!sink.push(4));
    }

    #[test]
    fn test_full_buffer_counts_drops() {
        let buffer = CaptureBuffer::new(2);
        let sink = buffer.sink();
        buffer.rewind_and_arm();
        assert_eq!(sink.extend(&[1, 2, 3, 4]), 2);
        assert!(!sink.push(5));
        assert_eq!(buffer.snapshot(), vec![1, 2]);
        assert_eq!(buffer.dropped(), 2);
    }

    #[test]
    fn test_push_from_previous_cycle_not_published() {
        let buffer = CaptureBuffer::new(8);
        let sink = buffer.sink();
        buffer.rewind_and_arm();
        sink.extend(&[0xAA, 0xBB]);

        // Producer reads the word, then a full transmit cycle completes.
        let stale = buffer.state();
        buffer.disarm_and_rewind();
        buffer.rewind_and_arm();

        assert!(!buffer.publish(stale, 0xCC));
        assert_eq!(buffer.available(), 0);
        assert_eq!(buffer.get(0), None);
        assert!(sink.push(0x01));
        assert_eq!(buffer.snapshot(), vec![0x01]);
    }

    #[test]
    fn test_rewind_while_disarmed_stays_disarmed() {
        let buffer = CaptureBuffer::new(4);
        buffer.rewind_and_arm();
        buffer.disarm_and_rewind();
        assert!(!buffer.state().is_armed());
        assert!(!buffer.sink().push(1));
    }

    #[test]
    fn test_cross_thread_publication() {
        let buffer = CaptureBuffer::new(64);
        buffer.rewind_and_arm();
        let sink = buffer.sink();

        let producer = thread::spawn(move || {
            for b in 0u8..64 {
                sink.push(b);
            }
        });

        // Every index below the observed length must already hold its byte.
        let mut seen = 0;
        while seen < 64 {
            let available = buffer.available();
            for i in seen..available {
                assert_eq!(buffer.get(i), Some(i as u8));
            }
            seen = available;
            std::hint::spin_loop();
        }
        producer.join().unwrap();
    }
}
