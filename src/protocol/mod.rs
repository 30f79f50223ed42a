// Wire format for AX-12 style servos (Dynamixel Protocol 1.0)
//
// Provides:
// - Instruction set and addressing constants
// - Instruction packet encoding and checksum validation
// - Status byte flags
// - Header-resynchronising frame assembler

pub mod instruction;
pub mod packet;
pub mod status;
pub mod sync;

pub use instruction::{BROADCAST_ID, HEADER, HEADER_MARKER, Instruction, MAX_DEVICE_ID};
pub use packet::{PACKET_OVERHEAD, checksum, encode_packet, is_valid_checksum};
pub use status::StatusError;
pub use sync::{FrameSync, MAX_FRAME, Step, SyncState};
