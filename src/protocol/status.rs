// Status packet error byte
//
// parameter[0] of every status packet. Bits are combinable; zero means no error.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error flags reported by a device in its status packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusError(u8);

impl StatusError {
    pub const NONE: StatusError = StatusError(0);
    pub const VOLTAGE: StatusError = StatusError(1 << 0);
    pub const ANGLE_LIMIT: StatusError = StatusError(1 << 1);
    pub const OVERHEATING: StatusError = StatusError(1 << 2);
    pub const RANGE: StatusError = StatusError(1 << 3);
    pub const CHECKSUM: StatusError = StatusError(1 << 4);
    pub const OVERLOAD: StatusError = StatusError(1 << 5);
    pub const INSTRUCTION: StatusError = StatusError(1 << 6);

    const NAMED: [(StatusError, &'static str); 7] = [
        (Self::VOLTAGE, "voltage"),
        (Self::ANGLE_LIMIT, "angle limit"),
        (Self::OVERHEATING, "overheating"),
        (Self::RANGE, "range"),
        (Self::CHECKSUM, "checksum"),
        (Self::OVERLOAD, "overload"),
        (Self::INSTRUCTION, "instruction"),
    ];

    pub const fn from_bits(bits: u8) -> Self {
        StatusError(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: StatusError) -> bool {
        self.0 & other.0 == other.0
    }

    /// Names of the flags that are set, lowest bit first
    pub fn iter(self) -> impl Iterator<Item = &'static str> {
        Self::NAMED
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl std::ops::BitOr for StatusError {
    type Output = StatusError;

    fn bitor(self, rhs: StatusError) -> StatusError {
        StatusError(self.0 | rhs.0)
    }
}

impl From<u8> for StatusError {
    fn from(bits: u8) -> Self {
        StatusError(bits)
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for name in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        // Bit 7 is reserved; show it rather than hiding it.
        if self.0 & 0x80 != 0 {
            if !first {
                f.write_str(", ")?;
            }
            f.write_str("reserved")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_combine() {
        let err = StatusError::OVERHEATING | StatusError::OVERLOAD;
        assert_eq!(err.bits(), 0x24);
        assert!(err.contains(StatusError::OVERLOAD));
        assert!(!err.contains(StatusError::VOLTAGE));
        assert!(!err.is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(StatusError::NONE.to_string(), "none");
        assert_eq!(StatusError::from_bits(0x03).to_string(), "voltage, angle limit");
        assert_eq!(StatusError::from_bits(0xC0).to_string(), "instruction, reserved");
    }

    #[test]
    fn test_iter_order() {
        let names: Vec<_> = StatusError::from_bits(0x7F).iter().collect();
        assert_eq!(names.len(), 7);
        assert_eq!(names[0], "voltage");
        assert_eq!(names[6], "instruction");
    }
}
