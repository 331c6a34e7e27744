//! Integrity fields: CRC-16 and 8-bit checksum
//!
//! The protocol allows either a CRC-16 (ITU polynomial, seed 0x1D0F) or a
//! single-byte two's-complement checksum, selected by a control byte flag.
//! The engine always transmits CRC-16; the checksum exists for decoding
//! peers that negotiated it.

const CRC16_SEED: u16 = 0x1D0F;

/// Precomputed CRC-16 table (ITU polynomial 0x1021)
static CRC16_TABLE: once_cell::sync::Lazy<[u16; 256]> = once_cell::sync::Lazy::new(|| {
    let mut table = [0u16; 256];
    for b in 0..=0xFFu16 {
        let mut v = b << 8;
        for _ in 0..8 {
            if (v & 0x8000) != 0 {
                v = (v << 1) ^ 0x1021;
            } else {
                v <<= 1;
            }
        }
        table[b as usize] = v;
    }
    table
});

/// Compute the packet CRC-16
pub fn compute_crc16(data: &[u8]) -> u16 {
    let mut crc = CRC16_SEED;
    for &byte in data {
        crc = (crc << 8) ^ CRC16_TABLE[(((crc >> 8) ^ byte as u16) & 0xFF) as usize];
    }
    crc
}

/// Compute the single-byte two's-complement checksum
///
/// The sum of all packet bytes including the checksum is zero modulo 256.
pub fn checksum8(data: &[u8]) -> u8 {
    let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    sum.wrapping_neg()
}
