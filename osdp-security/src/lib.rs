//! Secure channel layer for the OSDP control panel engine
//!
//! Implements the challenge/response handshake, session key derivation,
//! packet MAC chain, and payload encryption used by secure-mode traffic.
//! The primitives are direction-neutral: the CP engine drives them from the
//! master side, and the test suite drives them from the PD side.

pub mod crypto;
pub mod handshake;
pub mod keys;

pub use handshake::{
    cp_cryptogram, initial_rmac, pd_cryptogram, SecureChannel, SecureChannelState,
};
pub use keys::{compute_scbk, SessionKeys};
