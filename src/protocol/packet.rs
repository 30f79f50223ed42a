// Instruction packet encoding and checksum rules
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Length counts instruction + params + checksum, i.e. params.len() + 2.

use super::instruction::{HEADER, Instruction};
use crate::error::{BusError, Result};

/// Bytes in a packet that carry no parameters: header (2), id, length, instruction, checksum
pub const PACKET_OVERHEAD: usize = 6;

/// Largest parameter count that still fits the length byte
pub const MAX_PARAMS: usize = u8::MAX as usize - 2;

/// One's complement of the byte sum, modulo 256
pub fn checksum(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    !sum
}

/// Build an instruction packet with header, length and checksum.
/// More than [`MAX_PARAMS`] parameters cannot be described by the length byte.
pub fn encode_packet(id: u8, instruction: Instruction, params: &[u8]) -> Result<Vec<u8>> {
    if params.len() > MAX_PARAMS {
        return Err(BusError::InvalidLength { len: params.len() });
    }
    let length = (params.len() + 2) as u8;
    let mut packet = Vec::with_capacity(PACKET_OVERHEAD + params.len());

    packet.extend_from_slice(&HEADER);
    packet.push(id);
    packet.push(length);
    packet.push(instruction.into());
    packet.extend_from_slice(params);

    // Checksum over id, length, instruction, params
    let sum = checksum(&packet[2..]);
    packet.push(sum);

    Ok(packet)
}

/// Validate a complete frame (header included): the bytes from the id up to
/// and including the checksum must sum to 255 modulo 256.
pub fn is_valid_checksum(frame: &[u8]) -> bool {
    if frame.len() < PACKET_OVERHEAD - 1 {
        return false;
    }
    frame[2..].iter().fold(0u8, |acc, &b| acc.wrapping_add(b)) == 0xFF
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_checksum() {
        // ID=1, Length=4, Instruction=WRITE, Addr=30, Data=0, 2
        let data = [1u8, 4, 0x03, 30, 0, 2];
        // ~(1+4+3+30+0+2) = ~40 = 215
        assert_eq!(checksum(&data), 215);
    }

    #[test]
    fn test_encode_read_present_position() {
        let packet = encode_packet(1, Instruction::Read, &[43, 2]).unwrap();
        assert_eq!(packet, vec![0xFF, 0xFF, 0x01, 0x04, 0x02, 0x2B, 0x02, 0xCB]);
    }

    #[test]
    fn test_encode_ping() {
        let packet = encode_packet(1, Instruction::Ping, &[]).unwrap();
        assert_eq!(packet.len(), PACKET_OVERHEAD);
        assert_eq!(packet[3], 2); // instruction + checksum
        assert_eq!(packet[4], 0x01);
        assert_eq!(packet[5], !(1u8 + 2 + 1));
    }

    #[test]
    fn test_parameter_count_limit() {
        let packet = encode_packet(1, Instruction::Write, &[0; MAX_PARAMS]).unwrap();
        assert_eq!(packet[3], 0xFF);
        assert!(is_valid_checksum(&packet));

        assert!(matches!(
            encode_packet(1, Instruction::Write, &[0; MAX_PARAMS + 1]),
            Err(BusError::InvalidLength { len: 254 })
        ));
    }

    #[test]
    fn test_status_reply_validates() {
        let reply = [0xFF, 0xFF, 0x01, 0x04, 0x00, 0x96, 0x00, 0x64];
        assert!(is_valid_checksum(&reply));

        let mut corrupted = reply;
        corrupted[5] ^= 0x01;
        assert!(!is_valid_checksum(&corrupted));
    }

    #[test]
    fn test_short_frame_is_invalid() {
        assert!(!is_valid_checksum(&[0xFF, 0xFF, 0x01]));
    }

    proptest! {
        #[test]
        fn encoded_packets_always_validate(
            id in 0u8..=0xFE,
            op in prop::sample::select(vec![
                Instruction::Ping,
                Instruction::Read,
                Instruction::Write,
                Instruction::RegWrite,
                Instruction::Action,
                Instruction::Reset,
            ]),
            params in prop::collection::vec(any::<u8>(), 0..16),
        ) {
            let packet = encode_packet(id, op, &params).unwrap();
            prop_assert_eq!(packet.len(), PACKET_OVERHEAD + params.len());
            prop_assert_eq!(packet[3] as usize, params.len() + 2);
            prop_assert!(is_valid_checksum(&packet));
        }
    }
}
