//! Frame codec and session state for the OSDP control panel engine
//!
//! This crate owns the wire format: packet structure, integrity fields,
//! sequence numbers, command/reply code tables, and the per-device session
//! state enum.

pub mod codes;
pub mod crc;
pub mod frame;
pub mod state;

pub use codes::{nak, CommandCode, ReplyCode};
pub use crc::{checksum8, compute_crc16};
pub use frame::{
    extract_frame, next_sequence, scs, Packet, Scb, MAC_LEN, REPLY_ADDR_FLAG, SEQ_MODULUS, SOM,
};
pub use state::PdSessionState;
