// AX-12 instruction set (Dynamixel Protocol 1.0)

/// Packet header bytes
pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Single header marker byte, as seen by the frame synchroniser
pub const HEADER_MARKER: u8 = 0xFF;

/// Broadcast ID: every device on the bus executes, none replies
pub const BROADCAST_ID: u8 = 0xFE;

/// Highest addressable device ID
pub const MAX_DEVICE_ID: u8 = 0xFD;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Ping = 0x01,
    Read = 0x02,
    Write = 0x03,
    RegWrite = 0x04,
    Action = 0x05,
    Reset = 0x06,
    // Framing only; no encoder is provided for sync write.
    SyncWrite = 0x83,
}

impl Instruction {
    /// Whether a device addressed individually answers this instruction
    /// with a status packet (assuming it is configured to answer at all).
    pub fn expects_reply(self) -> bool {
        matches!(self, Instruction::Ping | Instruction::Read)
    }
}

impl From<Instruction> for u8 {
    fn from(instruction: Instruction) -> u8 {
        instruction as u8
    }
}

impl TryFrom<u8> for Instruction {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Instruction::Ping),
            0x02 => Ok(Instruction::Read),
            0x03 => Ok(Instruction::Write),
            0x04 => Ok(Instruction::RegWrite),
            0x05 => Ok(Instruction::Action),
            0x06 => Ok(Instruction::Reset),
            0x83 => Ok(Instruction::SyncWrite),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for op in [
            Instruction::Ping,
            Instruction::Read,
            Instruction::Write,
            Instruction::RegWrite,
            Instruction::Action,
            Instruction::Reset,
            Instruction::SyncWrite,
        ] {
            assert_eq!(Instruction::try_from(u8::from(op)), Ok(op));
        }
        assert_eq!(Instruction::try_from(0x07), Err(0x07));
    }

    #[test]
    fn test_expects_reply() {
        assert!(Instruction::Ping.expects_reply());
        assert!(Instruction::Read.expects_reply());
        assert!(!Instruction::Action.expects_reply());
        assert!(!Instruction::Reset.expects_reply());
    }
}
