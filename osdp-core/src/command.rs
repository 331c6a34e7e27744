//! Application command descriptors
//!
//! Commands are tagged structures handed to the engine via `send_command`.
//! They carry typed fields; the raw command body bytes are produced by
//! `wire_data` when the scheduler dispatches the command.

use serde::{Deserialize, Serialize};

/// LED color
///
/// A single named color per LED phase, not a combinable bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedColor {
    #[default]
    Black,
    Red,
    Green,
    Amber,
    Blue,
}

impl LedColor {
    /// Wire encoding of the color
    pub fn as_u8(&self) -> u8 {
        match self {
            LedColor::Black => 0,
            LedColor::Red => 1,
            LedColor::Green => 2,
            LedColor::Amber => 3,
            LedColor::Blue => 4,
        }
    }
}

/// Application command awaiting dispatch to a peripheral device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsdpCommand {
    /// Drive a reader LED
    Led {
        reader: u8,
        led_number: u8,
        control_code: u8,
        on_count: u8,
        off_count: u8,
        on_color: LedColor,
        off_color: LedColor,
        timer_count: u16,
        /// Temporary settings apply for `timer_count`; permanent otherwise
        temporary: bool,
    },
    /// Drive the reader buzzer
    Buzzer {
        reader: u8,
        control_code: u8,
        on_count: u8,
        off_count: u8,
        rep_count: u8,
    },
    /// Drive an output relay
    Output {
        output_number: u8,
        control_code: u8,
        timer_count: u16,
    },
    /// Reconfigure the device address and baud rate
    ComSet { address: u8, baud_rate: u32 },
}

impl OsdpCommand {
    /// Serialize the command body to wire bytes
    ///
    /// The LED body carries a temporary block and a permanent block; the
    /// `temporary` flag selects which block the settings populate, the other
    /// block is sent zeroed (no change).
    pub fn wire_data(&self) -> Vec<u8> {
        match *self {
            OsdpCommand::Led {
                reader,
                led_number,
                control_code,
                on_count,
                off_count,
                on_color,
                off_color,
                timer_count,
                temporary,
            } => {
                let mut data = vec![reader, led_number];
                let block = [
                    control_code,
                    on_count,
                    off_count,
                    on_color.as_u8(),
                    off_color.as_u8(),
                    (timer_count & 0xFF) as u8,
                    (timer_count >> 8) as u8,
                ];
                if temporary {
                    data.extend_from_slice(&block);
                    data.extend_from_slice(&[0u8; 5]);
                } else {
                    data.extend_from_slice(&[0u8; 7]);
                    data.extend_from_slice(&block[..5]);
                }
                data
            }
            OsdpCommand::Buzzer {
                reader,
                control_code,
                on_count,
                off_count,
                rep_count,
            } => vec![reader, control_code, on_count, off_count, rep_count],
            OsdpCommand::Output {
                output_number,
                control_code,
                timer_count,
            } => vec![
                output_number,
                control_code,
                (timer_count & 0xFF) as u8,
                (timer_count >> 8) as u8,
            ],
            OsdpCommand::ComSet { address, baud_rate } => {
                let mut data = vec![address];
                data.extend_from_slice(&baud_rate.to_le_bytes());
                data
            }
        }
    }

    /// Short command name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            OsdpCommand::Led { .. } => "LED",
            OsdpCommand::Buzzer { .. } => "BUZ",
            OsdpCommand::Output { .. } => "OUT",
            OsdpCommand::ComSet { .. } => "COMSET",
        }
    }
}
