//! Channel abstraction for the OSDP control panel engine
//!
//! The engine owns one `Channel` per physical link and only ever touches it
//! from within a `refresh()` tick. All operations are non-blocking; the
//! engine polls `available()` against its own timeout bookkeeping instead of
//! waiting on the channel.

pub mod channel;
pub mod memory;

pub use channel::Channel;
pub use memory::MemoryChannel;
