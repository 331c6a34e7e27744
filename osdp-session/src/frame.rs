//! Packet structure and encoding/decoding
//!
//! Wire layout:
//!
//! ```text
//! SOM | address | length (u16 LE) | control | [SCB] | id | data | [MAC] | CRC/checksum
//! ```
//!
//! The control byte carries the 2-bit sequence number, the CRC-16 flag and
//! the security control block (SCB) presence flag. Reply packets set the
//! high bit of the address byte. The length field counts every byte of the
//! packet including the integrity field.

use crate::crc::{checksum8, compute_crc16};
use bytes::{Buf, BytesMut};
use osdp_core::{OsdpError, OsdpResult};

/// Start of message marker
pub const SOM: u8 = 0x53;

/// High bit of the address byte, set on replies
pub const REPLY_ADDR_FLAG: u8 = 0x80;

/// Sequence number modulus; sequence 0 resets communication
pub const SEQ_MODULUS: u8 = 4;

/// Fixed header: SOM + address + length + control
const HEADER_LEN: usize = 5;

/// Smallest decodable packet: header + id + checksum
const MIN_PACKET_LEN: usize = HEADER_LEN + 2;

/// Upper bound used to reject corrupt length fields during resynchronization
const MAX_PACKET_LEN: usize = 1024;

/// MAC bytes carried on the wire in secure mode
pub const MAC_LEN: usize = 4;

const CTRL_SEQ_MASK: u8 = 0x03;
const CTRL_CRC16: u8 = 0x04;
const CTRL_HAS_SCB: u8 = 0x08;

/// Security control block types
pub mod scs {
    /// CHLNG command block
    pub const CHLNG: u8 = 0x11;
    /// CCRYPT reply block
    pub const CCRYPT: u8 = 0x12;
    /// SCRYPT command block
    pub const SCRYPT: u8 = 0x13;
    /// RMAC_I reply block
    pub const RMAC_I: u8 = 0x14;
    /// MACed command, plaintext data
    pub const CMD_MAC: u8 = 0x15;
    /// MACed reply, plaintext data
    pub const REPLY_MAC: u8 = 0x16;
    /// MACed command, encrypted data
    pub const CMD_ENC: u8 = 0x17;
    /// MACed reply, encrypted data
    pub const REPLY_ENC: u8 = 0x18;
}

/// Security control block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scb {
    pub scs_type: u8,
    pub data: Vec<u8>,
}

impl Scb {
    pub fn new(scs_type: u8) -> Self {
        Self {
            scs_type,
            data: Vec::new(),
        }
    }

    pub fn with_data(scs_type: u8, data: Vec<u8>) -> Self {
        Self { scs_type, data }
    }

    /// Whether packets carrying this block include a wire MAC
    pub fn has_mac(&self) -> bool {
        self.scs_type >= scs::CMD_MAC
    }

    /// Whether packets carrying this block have encrypted data
    pub fn is_encrypted(&self) -> bool {
        self.scs_type == scs::CMD_ENC || self.scs_type == scs::REPLY_ENC
    }

    fn wire_len(&self) -> usize {
        2 + self.data.len()
    }
}

/// One wire packet, transient during encode/decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// 7-bit device address
    pub address: u8,
    /// Reply bit from the address byte
    pub is_reply: bool,
    /// 2-bit sequence number
    pub sequence: u8,
    /// CRC-16 (true) or 8-bit checksum (false)
    pub use_crc: bool,
    pub scb: Option<Scb>,
    /// Command or reply code
    pub id: u8,
    /// Payload bytes (ciphertext in encrypted mode), MAC excluded
    pub data: Vec<u8>,
    /// Wire MAC, present when the SCB type requires one
    pub mac: Option<[u8; MAC_LEN]>,
}

impl Packet {
    /// Build a command packet
    pub fn command(address: u8, sequence: u8, id: u8, data: Vec<u8>) -> Self {
        Self {
            address,
            is_reply: false,
            sequence,
            use_crc: true,
            scb: None,
            id,
            data,
            mac: None,
        }
    }

    /// Build a reply packet
    pub fn reply(address: u8, sequence: u8, id: u8, data: Vec<u8>) -> Self {
        Self {
            address,
            is_reply: true,
            sequence,
            use_crc: true,
            scb: None,
            id,
            data,
            mac: None,
        }
    }

    pub fn with_scb(mut self, scb: Scb) -> Self {
        self.scb = Some(scb);
        self
    }

    fn integrity_len(&self) -> usize {
        if self.use_crc {
            2
        } else {
            1
        }
    }

    fn mac_len(&self) -> usize {
        match &self.scb {
            Some(scb) if scb.has_mac() => MAC_LEN,
            _ => 0,
        }
    }

    /// Encode everything up to (not including) the MAC and integrity field
    ///
    /// The length field already accounts for the trailing bytes, so the
    /// returned buffer is exactly the MAC scope of the packet. `seal`
    /// appends the remainder.
    pub fn encode_unsealed(&self) -> OsdpResult<Vec<u8>> {
        if self.address > 0x7F {
            return Err(OsdpError::FrameInvalid(format!(
                "Address {} out of range",
                self.address
            )));
        }
        if self.sequence >= SEQ_MODULUS {
            return Err(OsdpError::FrameInvalid(format!(
                "Sequence {} out of range",
                self.sequence
            )));
        }

        let scb_len = self.scb.as_ref().map_or(0, Scb::wire_len);
        let total = HEADER_LEN + scb_len + 1 + self.data.len() + self.mac_len()
            + self.integrity_len();
        if total > MAX_PACKET_LEN {
            return Err(OsdpError::FrameInvalid(format!(
                "Packet length {} exceeds maximum {}",
                total, MAX_PACKET_LEN
            )));
        }

        let mut out = Vec::with_capacity(total);
        out.push(SOM);
        out.push(if self.is_reply {
            self.address | REPLY_ADDR_FLAG
        } else {
            self.address
        });
        out.push((total & 0xFF) as u8);
        out.push((total >> 8) as u8);

        let mut ctrl = self.sequence & CTRL_SEQ_MASK;
        if self.use_crc {
            ctrl |= CTRL_CRC16;
        }
        if self.scb.is_some() {
            ctrl |= CTRL_HAS_SCB;
        }
        out.push(ctrl);

        if let Some(scb) = &self.scb {
            out.push(scb.wire_len() as u8);
            out.push(scb.scs_type);
            out.extend_from_slice(&scb.data);
        }

        out.push(self.id);
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Append the wire MAC (if any) and the integrity field
    pub fn seal(mut bytes: Vec<u8>, mac: Option<[u8; 16]>, use_crc: bool) -> Vec<u8> {
        if let Some(mac) = mac {
            bytes.extend_from_slice(&mac[..MAC_LEN]);
        }
        if use_crc {
            let crc = compute_crc16(&bytes);
            bytes.push((crc & 0xFF) as u8);
            bytes.push((crc >> 8) as u8);
        } else {
            bytes.push(checksum8(&bytes));
        }
        bytes
    }

    /// Encode a packet that carries no wire MAC
    pub fn encode(&self) -> OsdpResult<Vec<u8>> {
        if self.mac_len() != 0 {
            return Err(OsdpError::FrameInvalid(
                "MACed packet must be sealed explicitly".to_string(),
            ));
        }
        Ok(Self::seal(self.encode_unsealed()?, None, self.use_crc))
    }

    /// Decode and validate one complete packet
    ///
    /// Integrity is verified before any field is interpreted; every failure
    /// is a transient frame-level error, not fatal to the session.
    pub fn decode(buf: &[u8]) -> OsdpResult<Packet> {
        if buf.len() < MIN_PACKET_LEN {
            return Err(OsdpError::FrameInvalid(format!(
                "Packet too short: {} bytes",
                buf.len()
            )));
        }
        if buf[0] != SOM {
            return Err(OsdpError::FrameInvalid(format!(
                "Bad start of message: 0x{:02X}",
                buf[0]
            )));
        }
        let declared = u16::from_le_bytes([buf[2], buf[3]]) as usize;
        if declared != buf.len() {
            return Err(OsdpError::FrameInvalid(format!(
                "Length field {} does not match packet size {}",
                declared,
                buf.len()
            )));
        }

        let ctrl = buf[4];
        let use_crc = (ctrl & CTRL_CRC16) != 0;
        let has_scb = (ctrl & CTRL_HAS_SCB) != 0;
        let sequence = ctrl & CTRL_SEQ_MASK;

        if use_crc {
            let got = u16::from_le_bytes([buf[buf.len() - 2], buf[buf.len() - 1]]);
            let want = compute_crc16(&buf[..buf.len() - 2]);
            if got != want {
                return Err(OsdpError::FrameInvalid(format!(
                    "CRC mismatch: got 0x{:04X}, want 0x{:04X}",
                    got, want
                )));
            }
        } else {
            let got = buf[buf.len() - 1];
            let want = checksum8(&buf[..buf.len() - 1]);
            if got != want {
                return Err(OsdpError::FrameInvalid(format!(
                    "Checksum mismatch: got 0x{:02X}, want 0x{:02X}",
                    got, want
                )));
            }
        }

        let integrity_len = if use_crc { 2 } else { 1 };
        let mut pos = HEADER_LEN;
        let end = buf.len() - integrity_len;

        let scb = if has_scb {
            if pos + 2 > end {
                return Err(OsdpError::FrameInvalid(
                    "Packet truncated inside SCB header".to_string(),
                ));
            }
            let scb_len = buf[pos] as usize;
            if scb_len < 2 || pos + scb_len > end {
                return Err(OsdpError::FrameInvalid(format!(
                    "Bad SCB length: {}",
                    scb_len
                )));
            }
            let scb = Scb::with_data(buf[pos + 1], buf[pos + 2..pos + scb_len].to_vec());
            pos += scb_len;
            Some(scb)
        } else {
            None
        };

        if pos >= end {
            return Err(OsdpError::FrameInvalid(
                "Packet truncated before id byte".to_string(),
            ));
        }
        let id = buf[pos];
        pos += 1;

        let has_mac = scb.as_ref().is_some_and(Scb::has_mac);
        let (data_end, mac) = if has_mac {
            if end - pos < MAC_LEN {
                return Err(OsdpError::FrameInvalid(
                    "Packet truncated inside MAC".to_string(),
                ));
            }
            let mut mac = [0u8; MAC_LEN];
            mac.copy_from_slice(&buf[end - MAC_LEN..end]);
            (end - MAC_LEN, Some(mac))
        } else {
            (end, None)
        };

        Ok(Packet {
            address: buf[1] & !REPLY_ADDR_FLAG,
            is_reply: (buf[1] & REPLY_ADDR_FLAG) != 0,
            sequence,
            use_crc,
            scb,
            id,
            data: buf[pos..data_end].to_vec(),
            mac,
        })
    }

    /// The byte range of an encoded packet covered by the wire MAC
    pub fn mac_scope(buf: &[u8]) -> OsdpResult<&[u8]> {
        if buf.len() < MIN_PACKET_LEN {
            return Err(OsdpError::FrameInvalid(
                "Packet too short for MAC scope".to_string(),
            ));
        }
        let integrity_len = if (buf[4] & CTRL_CRC16) != 0 { 2 } else { 1 };
        let cut = integrity_len + MAC_LEN;
        if buf.len() <= cut {
            return Err(OsdpError::FrameInvalid(
                "Packet too short for MAC scope".to_string(),
            ));
        }
        Ok(&buf[..buf.len() - cut])
    }
}

/// Advance the next sequence number (1..=3 cycle; 0 is reserved for resets)
pub fn next_sequence(last: u8) -> u8 {
    (last % 3) + 1
}

/// Extract one complete packet from an accumulation buffer
///
/// Skips leading junk until a start marker with a plausible length field is
/// found; returns `None` while the packet is still incomplete. The caller
/// keeps the buffer across ticks so a reply split over several reads is
/// reassembled.
pub fn extract_frame(buf: &mut BytesMut) -> Option<Vec<u8>> {
    loop {
        match buf.iter().position(|&b| b == SOM) {
            None => {
                buf.clear();
                return None;
            }
            Some(start) => {
                buf.advance(start);
            }
        }
        if buf.len() < 4 {
            return None;
        }
        let declared = u16::from_le_bytes([buf[2], buf[3]]) as usize;
        if !(MIN_PACKET_LEN..=MAX_PACKET_LEN).contains(&declared) {
            // Not a real header; drop this marker and keep scanning
            buf.advance(1);
            continue;
        }
        if buf.len() < declared {
            return None;
        }
        return Some(buf.split_to(declared).to_vec());
    }
}
