//! OSDP - control panel side of the Open Supervised Device Protocol
//!
//! This library implements the control panel (CP) role: it supervises a set
//! of peripheral devices (card readers, door controllers) over shared
//! half-duplex serial channels, keeps each device's session alive with
//! liveness polls, establishes AES-128 secure channels, dispatches
//! application commands and surfaces device events.
//!
//! # Architecture
//!
//! This library is organized as a workspace with multiple crates:
//!
//! - `osdp-core`: Core types, configuration, error handling
//! - `osdp-transport`: Channel abstraction over physical links
//! - `osdp-session`: Frame codec, integrity, sequence numbers, session state
//! - `osdp-security`: Secure channel key derivation, handshake, MAC chain
//! - `osdp-cp`: The engine: scheduler, device sessions, queues, events
//!
//! # Usage
//!
//! ```no_run
//! use osdp::cp::ControlPanel;
//! use osdp::{MemoryChannel, PdConfig};
//!
//! let (cp_end, _pd_end) = MemoryChannel::pair();
//! let mut panel = ControlPanel::builder()
//!     .channel(Box::new(cp_end))
//!     .device(PdConfig::new(1, 0, 9600))
//!     .build()
//!     .unwrap();
//!
//! loop {
//!     panel.refresh();
//!     std::thread::sleep(std::time::Duration::from_millis(20));
//! }
//! ```

// Re-export core types
pub use osdp_core::{
    CardFormat, LedColor, MasterKey, OsdpCommand, OsdpError, OsdpEvent, OsdpResult, PdConfig,
    PdFlags,
};
pub use osdp_session::PdSessionState;
pub use osdp_transport::{Channel, MemoryChannel};

// Re-export the control panel API
pub mod cp {
    pub use osdp_cp::*;
}

// Re-export the session layer (frame codec, code tables)
pub mod session {
    pub use osdp_session::*;
}

// Re-export the security layer
pub mod security {
    pub use osdp_security::*;
}
