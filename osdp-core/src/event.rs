//! Decoded asynchronous device reports
//!
//! Events are decoded from reply payloads and handed to the application
//! callback; the engine retains nothing after dispatch.

use serde::{Deserialize, Serialize};

/// Card data format reported with a card read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardFormat {
    Unspecified,
    Wiegand,
    Ascii,
}

impl CardFormat {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => CardFormat::Wiegand,
            2 => CardFormat::Ascii,
            _ => CardFormat::Unspecified,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            CardFormat::Unspecified => 0,
            CardFormat::Wiegand => 1,
            CardFormat::Ascii => 2,
        }
    }
}

/// Asynchronous report decoded from a device reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsdpEvent {
    /// Card presented at a reader
    CardRead {
        reader: u8,
        format: CardFormat,
        /// Number of valid bits in `data`
        bit_count: u16,
        data: Vec<u8>,
    },
    /// Keypad digits entered at a reader
    KeyPress { reader: u8, digits: Vec<u8> },
    /// Local status report
    Status { tamper: bool, power_failure: bool },
}

impl OsdpEvent {
    /// Short event name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            OsdpEvent::CardRead { .. } => "CARD_READ",
            OsdpEvent::KeyPress { .. } => "KEY_PRESS",
            OsdpEvent::Status { .. } => "STATUS",
        }
    }
}
