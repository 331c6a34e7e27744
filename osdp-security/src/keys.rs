//! Session key material and derivation
//!
//! All key material here is derived fresh per handshake and lives only for
//! the duration of one secure session.

use crate::crypto::aes_ecb_encrypt;
use std::fmt;

/// Derivation tags mixed into the session key material
const TAG_S_MAC1: [u8; 2] = [0x01, 0x01];
const TAG_S_MAC2: [u8; 2] = [0x01, 0x02];
const TAG_S_ENC: [u8; 2] = [0x01, 0x82];

/// Derive the per-device secure channel base key (SCBK)
///
/// The SCBK is computed from the shared master key and the device's client
/// UID, so each device on a bus ends up with distinct key material even
/// though the installation shares one master key. The 16-byte derivation
/// input is the UID followed by its bitwise complement.
pub fn compute_scbk(master_key: &[u8; 16], client_uid: &[u8; 8]) -> [u8; 16] {
    let mut input = [0u8; 16];
    input[..8].copy_from_slice(client_uid);
    for i in 0..8 {
        input[8 + i] = !client_uid[i];
    }
    aes_ecb_encrypt(master_key, &input)
}

/// Symmetric session keys scoped to one secure session
///
/// Holds the payload encryption key and the two MAC chain keys. Destroyed
/// and re-derived whenever the handshake restarts; never persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    pub(crate) s_enc: [u8; 16],
    pub(crate) s_mac1: [u8; 16],
    pub(crate) s_mac2: [u8; 16],
}

impl SessionKeys {
    /// Derive session keys from the SCBK and the CP challenge (RND.A)
    ///
    /// Each key is the AES-ECB encryption under the SCBK of a tagged block
    /// carrying the first six challenge bytes.
    pub fn derive(scbk: &[u8; 16], cp_random: &[u8; 8]) -> Self {
        let make = |tag: [u8; 2]| {
            let mut input = [0u8; 16];
            input[..2].copy_from_slice(&tag);
            input[2..8].copy_from_slice(&cp_random[..6]);
            aes_ecb_encrypt(scbk, &input)
        };
        Self {
            s_enc: make(TAG_S_ENC),
            s_mac1: make(TAG_S_MAC1),
            s_mac2: make(TAG_S_MAC2),
        }
    }

    /// Payload encryption key
    pub fn enc_key(&self) -> &[u8; 16] {
        &self.s_enc
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}
