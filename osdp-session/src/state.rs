//! Device session state machine states

use osdp_core::{OsdpError, OsdpResult};

/// Protocol state of one device session
///
/// # State Transitions
/// ```text
/// Offline -> Negotiating (scheduler retry tick)
/// Negotiating -> SecureHandshake | Online | Offline
/// SecureHandshake -> Online | Offline
/// Online -> Resync (sequence/integrity anomaly) | Offline (retries exhausted)
/// Resync -> Online | SecureHandshake | Offline
/// ```
///
/// `Resync` routes back through `SecureHandshake` rather than directly to
/// secure operation: session keys are destroyed on any resynchronization, so
/// a previously-secure device re-authenticates before secure traffic resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PdSessionState {
    /// No traffic; periodically retried
    #[default]
    Offline,
    /// Identification/capability exchange in progress
    Negotiating,
    /// Secure channel handshake in progress
    SecureHandshake,
    /// Normal operation, polling and command dispatch
    Online,
    /// Sequence counter resynchronization in progress
    Resync,
}

impl PdSessionState {
    /// Whether application commands may be dispatched in this state
    pub fn can_dispatch(&self) -> bool {
        matches!(self, PdSessionState::Online)
    }

    /// Validate a state transition
    ///
    /// # Errors
    /// Returns `OsdpError::Protocol` for transitions the session lifecycle
    /// does not allow.
    pub fn validate_transition(&self, new_state: PdSessionState) -> OsdpResult<()> {
        use PdSessionState::*;
        let valid = match (*self, new_state) {
            (Offline, Negotiating) => true,
            (Negotiating, SecureHandshake) => true,
            (Negotiating, Online) => true,
            (Negotiating, Offline) => true,
            (SecureHandshake, Online) => true,
            (SecureHandshake, Offline) => true,
            (Online, Resync) => true,
            (Online, Offline) => true,
            (Resync, Online) => true,
            (Resync, SecureHandshake) => true,
            (Resync, Offline) => true,
            // Idempotent
            (Offline, Offline) => true,
            _ => false,
        };
        if valid {
            Ok(())
        } else {
            Err(OsdpError::Protocol(format!(
                "Invalid state transition: {:?} -> {:?}",
                self, new_state
            )))
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            PdSessionState::Offline => "Offline",
            PdSessionState::Negotiating => "Negotiating",
            PdSessionState::SecureHandshake => "SecureHandshake",
            PdSessionState::Online => "Online",
            PdSessionState::Resync => "Resync",
        }
    }
}
