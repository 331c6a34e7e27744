//! AES-128 primitives for the secure channel
//!
//! The wire protocol uses AES-128 in ECB mode for single-block key material
//! operations and CBC mode (with 0x80-then-zeros padding) for payload
//! buffers.

use aes::cipher::{
    block_padding::NoPadding, generic_array::GenericArray, BlockDecrypt, BlockDecryptMut,
    BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use aes::Aes128;
use osdp_core::{OsdpError, OsdpResult};

/// AES block size in bytes
pub const AES_BLOCK: usize = 16;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Encrypt a single block with AES-128-ECB
pub fn aes_ecb_encrypt(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut out);
    out.into()
}

/// Decrypt a single block with AES-128-ECB
pub fn aes_ecb_decrypt(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut out = GenericArray::clone_from_slice(block);
    cipher.decrypt_block(&mut out);
    out.into()
}

/// Pad a payload with 0x80 followed by zeros up to a block boundary
///
/// A marker byte is always appended, so an already-aligned payload grows by
/// one full block. This keeps unpadding unambiguous.
pub fn pad_payload(data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    out.push(0x80);
    while out.len() % AES_BLOCK != 0 {
        out.push(0);
    }
    out
}

/// Strip 0x80-then-zeros padding
///
/// # Errors
/// Returns `OsdpError::Security` when the padding marker is missing, which
/// indicates a decryption failure.
pub fn unpad_payload(data: &[u8]) -> OsdpResult<Vec<u8>> {
    let mut end = data.len();
    while end > 0 && data[end - 1] == 0 {
        end -= 1;
    }
    if end == 0 || data[end - 1] != 0x80 {
        return Err(OsdpError::Security(
            "Payload padding marker missing".to_string(),
        ));
    }
    Ok(data[..end - 1].to_vec())
}

/// Encrypt a block-aligned buffer with AES-128-CBC
pub fn aes_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> OsdpResult<Vec<u8>> {
    let mut buf = data.to_vec();
    let len = buf.len();
    let cipher = Aes128CbcEnc::new(
        GenericArray::from_slice(key),
        GenericArray::from_slice(iv),
    );
    let out = cipher
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|e| OsdpError::Security(format!("CBC encrypt failed: {}", e)))?;
    Ok(out.to_vec())
}

/// Decrypt a block-aligned buffer with AES-128-CBC
pub fn aes_cbc_decrypt(key: &[u8; 16], iv: &[u8; 16], data: &[u8]) -> OsdpResult<Vec<u8>> {
    if data.is_empty() || data.len() % AES_BLOCK != 0 {
        return Err(OsdpError::Security(format!(
            "Ciphertext length {} is not block-aligned",
            data.len()
        )));
    }
    let mut buf = data.to_vec();
    let cipher = Aes128CbcDec::new(
        GenericArray::from_slice(key),
        GenericArray::from_slice(iv),
    );
    let out = cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| OsdpError::Security(format!("CBC decrypt failed: {}", e)))?;
    Ok(out.to_vec())
}
