//! Event decoding and application callback dispatch

use log::{debug, warn};
use osdp_core::{CardFormat, OsdpError, OsdpEvent, OsdpResult};
use osdp_session::ReplyCode;

/// Application event callback: device index plus the decoded event
pub type EventCallback = Box<dyn FnMut(usize, OsdpEvent) + Send>;

/// Decode an event-bearing reply payload
///
/// # Errors
/// Returns `OsdpError::Protocol` for malformed payloads or replies that do
/// not carry an event.
pub fn decode_event(reply: ReplyCode, data: &[u8]) -> OsdpResult<OsdpEvent> {
    match reply {
        ReplyCode::Raw => {
            if data.len() < 4 {
                return Err(OsdpError::Protocol(format!(
                    "Card data report too short: {} bytes",
                    data.len()
                )));
            }
            let bit_count = u16::from_le_bytes([data[2], data[3]]);
            let byte_count = (bit_count as usize + 7) / 8;
            if data.len() < 4 + byte_count {
                return Err(OsdpError::Protocol(format!(
                    "Card data report claims {} bits but carries {} bytes",
                    bit_count,
                    data.len() - 4
                )));
            }
            Ok(OsdpEvent::CardRead {
                reader: data[0],
                format: CardFormat::from_u8(data[1]),
                bit_count,
                data: data[4..4 + byte_count].to_vec(),
            })
        }
        ReplyCode::Keypad => {
            if data.len() < 2 {
                return Err(OsdpError::Protocol(format!(
                    "Keypad report too short: {} bytes",
                    data.len()
                )));
            }
            let count = data[1] as usize;
            if data.len() < 2 + count {
                return Err(OsdpError::Protocol(format!(
                    "Keypad report claims {} digits but carries {}",
                    count,
                    data.len() - 2
                )));
            }
            Ok(OsdpEvent::KeyPress {
                reader: data[0],
                digits: data[2..2 + count].to_vec(),
            })
        }
        ReplyCode::LocalStatus => {
            if data.len() < 2 {
                return Err(OsdpError::Protocol(format!(
                    "Status report too short: {} bytes",
                    data.len()
                )));
            }
            Ok(OsdpEvent::Status {
                tamper: data[0] != 0,
                power_failure: data[1] != 0,
            })
        }
        other => Err(OsdpError::Protocol(format!(
            "Reply 0x{:02X} does not carry an event",
            other.as_u8()
        ))),
    }
}

/// Routes decoded events to the registered application callback
///
/// Events arriving before a callback is registered are logged and discarded;
/// the engine retains nothing after dispatch.
#[derive(Default)]
pub struct EventDispatcher {
    callback: Option<EventCallback>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&mut self, callback: EventCallback) {
        self.callback = Some(callback);
    }

    pub fn dispatch(&mut self, device: usize, event: OsdpEvent) {
        debug!("PD[{}]: event {}", device, event.name());
        match &mut self.callback {
            Some(cb) => cb(device, event),
            None => warn!(
                "PD[{}]: event {} discarded, no callback registered",
                device,
                event.name()
            ),
        }
    }
}
