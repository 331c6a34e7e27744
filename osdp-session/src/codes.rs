//! Command and reply code tables

use osdp_core::{OsdpError, OsdpResult};

/// Commands originated by the control panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandCode {
    /// Liveness poll
    Poll,
    /// Identification report request
    Id,
    /// Capability report request
    Cap,
    /// Local status report request
    LocalStatus,
    /// Output control
    Output,
    /// Reader LED control
    Led,
    /// Reader buzzer control
    Buzzer,
    /// Communication parameter set
    ComSet,
    /// Secure channel challenge
    Challenge,
    /// Secure channel server cryptogram
    SCrypt,
}

impl CommandCode {
    pub fn as_u8(&self) -> u8 {
        match self {
            CommandCode::Poll => 0x60,
            CommandCode::Id => 0x61,
            CommandCode::Cap => 0x62,
            CommandCode::LocalStatus => 0x64,
            CommandCode::Output => 0x68,
            CommandCode::Led => 0x69,
            CommandCode::Buzzer => 0x6A,
            CommandCode::ComSet => 0x6E,
            CommandCode::Challenge => 0x76,
            CommandCode::SCrypt => 0x77,
        }
    }

    pub fn from_u8(value: u8) -> OsdpResult<Self> {
        match value {
            0x60 => Ok(CommandCode::Poll),
            0x61 => Ok(CommandCode::Id),
            0x62 => Ok(CommandCode::Cap),
            0x64 => Ok(CommandCode::LocalStatus),
            0x68 => Ok(CommandCode::Output),
            0x69 => Ok(CommandCode::Led),
            0x6A => Ok(CommandCode::Buzzer),
            0x6E => Ok(CommandCode::ComSet),
            0x76 => Ok(CommandCode::Challenge),
            0x77 => Ok(CommandCode::SCrypt),
            _ => Err(OsdpError::Protocol(format!(
                "Unknown command code: 0x{:02X}",
                value
            ))),
        }
    }
}

/// Replies originated by a peripheral device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    /// Positive acknowledge, no data
    Ack,
    /// Negative acknowledge with reason code
    Nak,
    /// Identification report
    PdId,
    /// Capability report
    PdCap,
    /// Local status report
    LocalStatus,
    /// Raw card data report
    Raw,
    /// Keypad data report
    Keypad,
    /// Communication parameter report
    Com,
    /// Secure channel client cryptogram
    CCrypt,
    /// Secure channel initial reply MAC
    RMacI,
}

impl ReplyCode {
    pub fn as_u8(&self) -> u8 {
        match self {
            ReplyCode::Ack => 0x40,
            ReplyCode::Nak => 0x41,
            ReplyCode::PdId => 0x45,
            ReplyCode::PdCap => 0x46,
            ReplyCode::LocalStatus => 0x48,
            ReplyCode::Raw => 0x50,
            ReplyCode::Keypad => 0x53,
            ReplyCode::Com => 0x54,
            ReplyCode::CCrypt => 0x76,
            ReplyCode::RMacI => 0x78,
        }
    }

    pub fn from_u8(value: u8) -> OsdpResult<Self> {
        match value {
            0x40 => Ok(ReplyCode::Ack),
            0x41 => Ok(ReplyCode::Nak),
            0x45 => Ok(ReplyCode::PdId),
            0x46 => Ok(ReplyCode::PdCap),
            0x48 => Ok(ReplyCode::LocalStatus),
            0x50 => Ok(ReplyCode::Raw),
            0x53 => Ok(ReplyCode::Keypad),
            0x54 => Ok(ReplyCode::Com),
            0x76 => Ok(ReplyCode::CCrypt),
            0x78 => Ok(ReplyCode::RMacI),
            _ => Err(OsdpError::Protocol(format!(
                "Unknown reply code: 0x{:02X}",
                value
            ))),
        }
    }

    /// Whether this reply carries an asynchronous event for the application
    pub fn carries_event(&self) -> bool {
        matches!(
            self,
            ReplyCode::Raw | ReplyCode::Keypad | ReplyCode::LocalStatus
        )
    }
}

/// NAK reason codes
pub mod nak {
    /// Message integrity check failed at the PD
    pub const MSG_CHECK: u8 = 0x01;
    /// Command length out of range
    pub const CMD_LEN: u8 = 0x02;
    /// Unknown command code
    pub const CMD_UNKNOWN: u8 = 0x03;
    /// Unexpected sequence number
    pub const SEQ_NUM: u8 = 0x04;
    /// Security block not accepted
    pub const SC_UNSUP: u8 = 0x05;
    /// Communication security conditions not met
    pub const SC_COND: u8 = 0x06;
}
