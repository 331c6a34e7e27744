//! Secure channel lifecycle, handshake and per-packet operations
//!
//! The handshake is a three-leg challenge/response:
//!
//! ```text
//! CP -> PD   CHLNG   RND.A
//! PD -> CP   CCRYPT  cUID | RND.B | PD cryptogram
//! CP -> PD   SCRYPT  CP cryptogram
//! PD -> CP   RMAC_I  initial reply MAC
//! ```
//!
//! The CP verifies the PD cryptogram before deriving anything further; a
//! mismatch means the peer holds different key material and the handshake
//! aborts without activating the channel.

use crate::crypto::{
    aes_cbc_decrypt, aes_cbc_encrypt, aes_ecb_encrypt, pad_payload, unpad_payload, AES_BLOCK,
};
use crate::keys::{compute_scbk, SessionKeys};
use osdp_core::{OsdpError, OsdpResult};
use rand::rngs::OsRng;
use rand::RngCore;

/// Length of the challenge material each side contributes
pub const CHALLENGE_LEN: usize = 8;

/// Length of the CCRYPT reply body: cUID + RND.B + cryptogram
pub const CCRYPT_LEN: usize = 32;

/// Secure channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecureChannelState {
    /// No session, no key material
    #[default]
    Inactive,
    /// CHLNG sent, waiting for the PD's CCRYPT
    WaitCcrypt,
    /// SCRYPT sent, waiting for the PD's initial reply MAC
    WaitRmacI,
    /// Session established, all traffic MACed and encrypted
    Active,
}

/// PD cryptogram: proof that the PD derived the same session keys
pub fn pd_cryptogram(keys: &SessionKeys, cp_random: &[u8; 8], pd_random: &[u8; 8]) -> [u8; 16] {
    let mut input = [0u8; 16];
    input[..8].copy_from_slice(cp_random);
    input[8..].copy_from_slice(pd_random);
    aes_ecb_encrypt(&keys.s_enc, &input)
}

/// CP cryptogram: proof that the CP derived the same session keys
pub fn cp_cryptogram(keys: &SessionKeys, cp_random: &[u8; 8], pd_random: &[u8; 8]) -> [u8; 16] {
    let mut input = [0u8; 16];
    input[..8].copy_from_slice(pd_random);
    input[8..].copy_from_slice(cp_random);
    aes_ecb_encrypt(&keys.s_enc, &input)
}

/// Initial reply MAC sent by the PD in RMAC_I
pub fn initial_rmac(keys: &SessionKeys, cp_crypt: &[u8; 16]) -> [u8; 16] {
    let inner = aes_ecb_encrypt(&keys.s_mac1, cp_crypt);
    aes_ecb_encrypt(&keys.s_mac2, &inner)
}

/// Per-device secure channel context
///
/// Owns the session keys and the running MAC chain. One instance per device
/// session; `reset()` wipes everything so a restarted handshake always
/// derives fresh material.
#[derive(Debug, Default)]
pub struct SecureChannel {
    state: SecureChannelState,
    keys: Option<SessionKeys>,
    cp_random: [u8; 8],
    pd_random: [u8; 8],
    cp_crypt: [u8; 16],
    /// MAC of the last command packet (either direction's view)
    cmac: [u8; 16],
    /// MAC of the last reply packet
    rmac: [u8; 16],
}

impl SecureChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SecureChannelState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SecureChannelState::Active
    }

    /// Tear the session down and wipe key material
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Start a handshake: generate fresh CP challenge material
    ///
    /// Any previous session state is destroyed first.
    pub fn begin_handshake(&mut self) -> [u8; 8] {
        self.reset();
        OsRng.fill_bytes(&mut self.cp_random);
        self.state = SecureChannelState::WaitCcrypt;
        self.cp_random
    }

    /// Process the PD's CCRYPT body and verify its cryptogram
    ///
    /// On success the CP cryptogram for the SCRYPT leg is returned. On any
    /// failure the channel resets; the caller decides between plain-mode
    /// fallback and offline.
    pub fn handle_ccrypt(&mut self, master_key: &[u8; 16], data: &[u8]) -> OsdpResult<[u8; 16]> {
        if self.state != SecureChannelState::WaitCcrypt {
            return Err(OsdpError::Security(
                "CCRYPT received outside handshake".to_string(),
            ));
        }
        if data.len() != CCRYPT_LEN {
            self.reset();
            return Err(OsdpError::Security(format!(
                "CCRYPT body must be {} bytes, got {}",
                CCRYPT_LEN,
                data.len()
            )));
        }

        let mut client_uid = [0u8; 8];
        client_uid.copy_from_slice(&data[..8]);
        self.pd_random.copy_from_slice(&data[8..16]);

        let scbk = compute_scbk(master_key, &client_uid);
        let keys = SessionKeys::derive(&scbk, &self.cp_random);

        let expected = pd_cryptogram(&keys, &self.cp_random, &self.pd_random);
        if expected != data[16..32] {
            self.reset();
            return Err(OsdpError::Security(
                "PD cryptogram verification failed".to_string(),
            ));
        }

        self.cp_crypt = cp_cryptogram(&keys, &self.cp_random, &self.pd_random);
        self.keys = Some(keys);
        self.state = SecureChannelState::WaitRmacI;
        Ok(self.cp_crypt)
    }

    /// Process the PD's RMAC_I body and activate the session
    pub fn handle_rmac_i(&mut self, data: &[u8]) -> OsdpResult<()> {
        if self.state != SecureChannelState::WaitRmacI {
            return Err(OsdpError::Security(
                "RMAC_I received outside handshake".to_string(),
            ));
        }
        let keys = self.keys.as_ref().ok_or_else(|| {
            OsdpError::Security("RMAC_I received without session keys".to_string())
        })?;
        if data.len() != AES_BLOCK {
            self.reset();
            return Err(OsdpError::Security(format!(
                "RMAC_I body must be {} bytes, got {}",
                AES_BLOCK,
                data.len()
            )));
        }
        let expected = initial_rmac(keys, &self.cp_crypt);
        if expected != data[..] {
            self.reset();
            return Err(OsdpError::Security(
                "Initial reply MAC verification failed".to_string(),
            ));
        }
        let mut rmac = [0u8; 16];
        rmac.copy_from_slice(data);
        self.activate(rmac);
        Ok(())
    }

    /// Install derived session keys directly (peer side of the handshake)
    pub fn install(&mut self, scbk: &[u8; 16], cp_random: [u8; 8], pd_random: [u8; 8]) {
        self.reset();
        self.cp_random = cp_random;
        self.pd_random = pd_random;
        self.keys = Some(SessionKeys::derive(scbk, &cp_random));
        self.state = SecureChannelState::WaitRmacI;
    }

    /// Activate the session with the agreed initial reply MAC
    pub fn activate(&mut self, rmac_i: [u8; 16]) {
        self.rmac = rmac_i;
        self.cmac = [0u8; 16];
        self.state = SecureChannelState::Active;
    }

    /// Session keys, if derived
    pub fn keys(&self) -> Option<&SessionKeys> {
        self.keys.as_ref()
    }

    /// Compute the packet MAC over `data` without committing chain state
    ///
    /// Command MACs chain from the last reply MAC and vice versa, so a
    /// replayed or reordered packet cannot carry a valid MAC. The first four
    /// bytes travel on the wire; `commit_mac` advances the chain only after
    /// the packet is accepted.
    pub fn compute_mac(&self, for_command: bool, data: &[u8]) -> OsdpResult<[u8; 16]> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| OsdpError::Security("MAC requested without session keys".to_string()))?;

        let buf = if data.len() % AES_BLOCK == 0 {
            data.to_vec()
        } else {
            pad_payload(data)
        };

        let mut state = if for_command { self.rmac } else { self.cmac };
        let blocks = buf.len() / AES_BLOCK;
        for (i, chunk) in buf.chunks_exact(AES_BLOCK).enumerate() {
            let mut block = [0u8; 16];
            for (j, b) in chunk.iter().enumerate() {
                block[j] = b ^ state[j];
            }
            let key = if i + 1 == blocks {
                &keys.s_mac2
            } else {
                &keys.s_mac1
            };
            state = aes_ecb_encrypt(key, &block);
        }
        Ok(state)
    }

    /// Advance the MAC chain after a packet is accepted
    pub fn commit_mac(&mut self, for_command: bool, mac: [u8; 16]) {
        if for_command {
            self.cmac = mac;
        } else {
            self.rmac = mac;
        }
    }

    /// Encrypt a payload for transmission
    ///
    /// The IV is the bitwise complement of the most recent MAC from the
    /// opposite direction, binding the ciphertext to its place in the
    /// exchange sequence.
    pub fn encrypt_payload(&self, for_command: bool, data: &[u8]) -> OsdpResult<Vec<u8>> {
        let keys = self.keys.as_ref().ok_or_else(|| {
            OsdpError::Security("Encrypt requested without session keys".to_string())
        })?;
        let iv = self.payload_iv(for_command);
        aes_cbc_encrypt(&keys.s_enc, &iv, &pad_payload(data))
    }

    /// Decrypt and unpad a received payload
    ///
    /// Any failure here is a hard per-frame rejection; the caller discards
    /// the frame without interpreting it.
    pub fn decrypt_payload(&self, for_command: bool, data: &[u8]) -> OsdpResult<Vec<u8>> {
        let keys = self.keys.as_ref().ok_or_else(|| {
            OsdpError::Security("Decrypt requested without session keys".to_string())
        })?;
        let iv = self.payload_iv(for_command);
        unpad_payload(&aes_cbc_decrypt(&keys.s_enc, &iv, data)?)
    }

    fn payload_iv(&self, for_command: bool) -> [u8; 16] {
        let base = if for_command { self.rmac } else { self.cmac };
        let mut iv = [0u8; 16];
        for (i, b) in base.iter().enumerate() {
            iv[i] = !b;
        }
        iv
    }
}
