// Error types for bus communication

/// Error types for AX-12 bus communication
///
/// A device that answers with error bits set is not a `BusError`; those bits
/// are surfaced through [`Ax12Bus::last_error`](crate::bus::Ax12Bus::last_error).
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for response from device {id}")]
    Timeout { id: u8 },

    #[error("Checksum mismatch for device {id}")]
    ChecksumMismatch { id: u8 },

    #[error("Reply from device {got} while waiting for device {expected}")]
    UnexpectedId { expected: u8, got: u8 },

    #[error("Unsupported register width {width} (expected 1 or 2)")]
    InvalidWidth { width: u8 },

    #[error("Frame length {len} does not fit a packet")]
    InvalidLength { len: usize },

    #[error("Broadcast ID cannot be used for an instruction that needs a reply")]
    BroadcastRead,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BusError {
    /// Timeout and checksum failure: no usable reply arrived.
    pub fn is_no_reply(&self) -> bool {
        matches!(self, BusError::Timeout { .. } | BusError::ChecksumMismatch { .. })
    }
}

pub type Result<T> = std::result::Result<T, BusError>;
