//! OSDP control panel engine
//!
//! A `ControlPanel` owns one or more physical channels and a session per
//! configured peripheral device. The application drives it by calling
//! `refresh()` on a steady cadence; each call advances every device by at
//! most one protocol action and returns without blocking.
//!
//! All configuration and session state lives inside the instance; multiple
//! independent panels can coexist in one process.

pub mod device;
pub mod events;
pub mod panel;
pub mod queue;

pub use device::{PdCapability, PdIdReport, PdSession};
pub use events::{decode_event, EventCallback, EventDispatcher};
pub use panel::{ControlPanel, ControlPanelBuilder, Timings};
pub use queue::{CommandQueue, EnqueueOutcome};
