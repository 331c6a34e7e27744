//! Core types and utilities for the OSDP control panel engine
//!
//! This crate provides fundamental types, error handling, and the
//! configuration/data model shared by all other layers.

pub mod command;
pub mod config;
pub mod error;
pub mod event;

pub use command::{LedColor, OsdpCommand};
pub use config::{validate_pd_configs, MasterKey, PdConfig, PdFlags, MAX_PD_ADDRESS};
pub use error::{OsdpError, OsdpResult};
pub use event::{CardFormat, OsdpEvent};
