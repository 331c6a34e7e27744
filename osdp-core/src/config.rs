//! Static configuration for the control panel and its peripheral devices

use crate::error::{OsdpError, OsdpResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest address assignable to a peripheral device.
///
/// The wire format reserves the top bit of the address byte to mark reply
/// packets, so valid device addresses are 0-127.
pub const MAX_PD_ADDRESS: u8 = 0x7F;

/// Per-device option flags
///
/// Represented as named booleans rather than a raw bitmask so the
/// configuration surface stays type-safe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdFlags {
    /// Refuse to operate the device in plaintext mode. When set, a failed
    /// secure channel handshake sends the device offline instead of falling
    /// back to plain operation.
    pub enforce_secure_channel: bool,
}

/// Static descriptor of one peripheral device
///
/// Created once at setup from application configuration and immutable for
/// the lifetime of the engine. Runtime state lives in the engine's device
/// session, never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PdConfig {
    /// Device address, unique within its channel (0-127)
    pub address: u8,
    /// Option flags
    pub flags: PdFlags,
    /// Index of the physical channel this device is bound to
    pub channel: usize,
    /// Configured symbol rate of the channel, used for COMSET commands
    pub baud_rate: u32,
}

impl PdConfig {
    /// Create a descriptor with default flags
    pub fn new(address: u8, channel: usize, baud_rate: u32) -> Self {
        Self {
            address,
            flags: PdFlags::default(),
            channel,
            baud_rate,
        }
    }
}

/// Shared AES-128 master key supplied at setup
///
/// Per-device secure channel base keys are derived from this key; it is
/// never sent on the wire and never persisted by the engine.
#[derive(Clone, PartialEq, Eq)]
pub struct MasterKey {
    key: [u8; 16],
}

impl MasterKey {
    /// Construct from raw key material
    ///
    /// # Errors
    /// Returns `OsdpError::Config` if the key is not exactly 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> OsdpResult<Self> {
        if bytes.len() != 16 {
            return Err(OsdpError::Config(format!(
                "Master key must be 16 bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; 16];
        key.copy_from_slice(bytes);
        Ok(Self { key })
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.key
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs
        f.debug_struct("MasterKey").finish_non_exhaustive()
    }
}

/// Validate a device list against the available channels
///
/// Setup-time validation is the only fatal error path in the engine: a
/// duplicate address on a shared channel, an out-of-range address, or a
/// dangling channel binding is rejected before any device communication
/// begins.
pub fn validate_pd_configs(configs: &[PdConfig], channel_count: usize) -> OsdpResult<()> {
    if configs.is_empty() {
        return Err(OsdpError::Config("No devices configured".to_string()));
    }
    for (i, cfg) in configs.iter().enumerate() {
        if cfg.address > MAX_PD_ADDRESS {
            return Err(OsdpError::Config(format!(
                "PD[{}]: address {} out of range (0-{})",
                i, cfg.address, MAX_PD_ADDRESS
            )));
        }
        if cfg.channel >= channel_count {
            return Err(OsdpError::Config(format!(
                "PD[{}]: channel index {} out of range ({} channels)",
                i, cfg.channel, channel_count
            )));
        }
        for (j, other) in configs.iter().enumerate().take(i) {
            if other.channel == cfg.channel && other.address == cfg.address {
                return Err(OsdpError::Config(format!(
                    "PD[{}] and PD[{}] share address {} on channel {}",
                    j, i, cfg.address, cfg.channel
                )));
            }
        }
    }
    Ok(())
}
