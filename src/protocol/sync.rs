// Status frame synchroniser
//
// Consumes raw capture bytes one at a time and assembles a frame of a known
// length. Two noise patterns of a shared half-duplex line are tolerated:
// garbage before the first header marker, and an extra header marker where the
// id is expected. Anything else is left for the checksum to reject.

use super::instruction::HEADER_MARKER;
use super::packet::is_valid_checksum;

/// Largest frame the synchroniser will assemble
pub const MAX_FRAME: usize = 64;

/// Position of the synchroniser within the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Waiting for the header (frame bytes 0 and 1)
    SeekingHeader,
    /// Waiting for the id byte (frame byte 2)
    SeekingId,
    /// Collecting length, instruction/error, params and checksum
    Accumulating,
    /// `expected` bytes have been accepted
    Done,
}

/// What happened to a byte handed to [`FrameSync::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Accepted,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct FrameSync {
    buf: [u8; MAX_FRAME],
    expected: usize,
    accepted: usize,
    skipped: usize,
}

impl FrameSync {
    /// `expected` is the full frame length, header and checksum included.
    /// Returns None for lengths beyond [`MAX_FRAME`].
    pub fn new(expected: usize) -> Option<Self> {
        (expected <= MAX_FRAME).then(|| Self {
            buf: [0; MAX_FRAME],
            expected,
            accepted: 0,
            skipped: 0,
        })
    }

    pub fn state(&self) -> SyncState {
        match self.accepted {
            n if n >= self.expected => SyncState::Done,
            0 | 1 => SyncState::SeekingHeader,
            2 => SyncState::SeekingId,
            _ => SyncState::Accumulating,
        }
    }

    /// Index into the capture log of the next byte this synchroniser needs
    pub fn next_index(&self) -> usize {
        self.accepted + self.skipped
    }

    /// Bytes discarded as noise so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Feed the byte found at [`next_index`](Self::next_index).
    pub fn push(&mut self, byte: u8) -> Step {
        let step = match self.state() {
            SyncState::Done => return Step::Skipped,
            // Only the very first byte must be a marker; the second is taken as-is.
            SyncState::SeekingHeader if self.accepted == 0 && byte != HEADER_MARKER => {
                Step::Skipped
            }
            // Duplicated header marker sitting where the id belongs.
            SyncState::SeekingId if byte == HEADER_MARKER => Step::Skipped,
            _ => Step::Accepted,
        };

        match step {
            Step::Accepted => {
                self.buf[self.accepted] = byte;
                self.accepted += 1;
            }
            Step::Skipped => self.skipped += 1,
        }
        step
    }

    /// Accepted bytes so far
    pub fn frame(&self) -> &[u8] {
        &self.buf[..self.accepted]
    }

    /// Complete and checksum-valid
    pub fn is_valid(&self) -> bool {
        self.state() == SyncState::Done && is_valid_checksum(self.frame())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const REPLY: [u8; 8] = [0xFF, 0xFF, 0x01, 0x04, 0x00, 0x96, 0x00, 0x64];

    fn feed(sync: &mut FrameSync, bytes: &[u8]) {
        for &b in bytes {
            if sync.state() == SyncState::Done {
                break;
            }
            sync.push(b);
        }
    }

    #[test]
    fn test_clean_frame() {
        let mut sync = FrameSync::new(REPLY.len()).unwrap();
        assert_eq!(sync.state(), SyncState::SeekingHeader);
        feed(&mut sync, &REPLY);
        assert_eq!(sync.state(), SyncState::Done);
        assert_eq!(sync.frame(), &REPLY);
        assert_eq!(sync.skipped(), 0);
        assert!(sync.is_valid());
    }

    #[test]
    fn test_state_progression() {
        let mut sync = FrameSync::new(REPLY.len()).unwrap();
        sync.push(0xFF);
        assert_eq!(sync.state(), SyncState::SeekingHeader);
        sync.push(0xFF);
        assert_eq!(sync.state(), SyncState::SeekingId);
        sync.push(0x01);
        assert_eq!(sync.state(), SyncState::Accumulating);
    }

    #[test]
    fn test_leading_noise_skipped() {
        let mut sync = FrameSync::new(REPLY.len()).unwrap();
        assert_eq!(sync.push(0x00), Step::Skipped);
        assert_eq!(sync.push(0x42), Step::Skipped);
        assert_eq!(sync.next_index(), 2);
        feed(&mut sync, &REPLY);
        assert_eq!(sync.frame(), &REPLY);
        assert!(sync.is_valid());
    }

    #[test]
    fn test_duplicate_header_at_id() {
        let noisy = [0xFF, 0xFF, 0xFF, 0x01, 0x04, 0x00, 0x96, 0x00, 0x64];
        let mut sync = FrameSync::new(REPLY.len()).unwrap();
        feed(&mut sync, &noisy);
        assert_eq!(sync.skipped(), 1);
        assert_eq!(sync.frame()[2], 0x01);
        assert!(sync.is_valid());
    }

    #[test]
    fn test_second_header_byte_not_checked() {
        // Only byte 0 is required to be a marker.
        let mut sync = FrameSync::new(3).unwrap();
        assert_eq!(sync.push(0xFF), Step::Accepted);
        assert_eq!(sync.push(0x10), Step::Accepted);
        assert_eq!(sync.state(), SyncState::SeekingId);
    }

    #[test]
    fn test_corrupt_payload_rejected() {
        let mut bad = REPLY;
        bad[6] = 0x01;
        let mut sync = FrameSync::new(bad.len()).unwrap();
        feed(&mut sync, &bad);
        assert_eq!(sync.state(), SyncState::Done);
        assert!(!sync.is_valid());
    }

    #[test]
    fn test_incomplete_is_not_valid() {
        let mut sync = FrameSync::new(REPLY.len()).unwrap();
        feed(&mut sync, &REPLY[..5]);
        assert_eq!(sync.state(), SyncState::Accumulating);
        assert!(!sync.is_valid());
    }

    #[test]
    fn test_oversized_frame_refused() {
        assert!(FrameSync::new(MAX_FRAME).is_some());
        assert!(FrameSync::new(MAX_FRAME + 1).is_none());
    }

    #[test]
    fn test_push_after_done_ignored() {
        let mut sync = FrameSync::new(REPLY.len()).unwrap();
        feed(&mut sync, &REPLY);
        assert_eq!(sync.push(0x00), Step::Skipped);
        assert_eq!(sync.frame(), &REPLY);
    }

    proptest! {
        #[test]
        fn resync_is_noise_length_invariant(
            noise in prop::collection::vec(0u8..0xFF, 1..=4),
        ) {
            let mut sync = FrameSync::new(REPLY.len()).unwrap();
            feed(&mut sync, &noise);
            feed(&mut sync, &REPLY);
            prop_assert_eq!(sync.frame(), &REPLY[..]);
            prop_assert_eq!(sync.skipped(), noise.len());
            prop_assert!(sync.is_valid());
        }

        #[test]
        fn single_corrupted_byte_is_rejected(
            index in 3usize..REPLY.len(),
            flip in 1u8..=0xFF,
        ) {
            let mut bad = REPLY;
            bad[index] ^= flip;
            let mut sync = FrameSync::new(bad.len()).unwrap();
            feed(&mut sync, &bad);
            prop_assert!(!sync.is_valid());
        }
    }
}
