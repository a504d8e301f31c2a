//! Per-object data encryption keys.
//!
//! Key material is a 48-byte blob split 32+16 into an AES-256-GCM key
//! and IV. Every stored object gets its own random data key; the
//! wrapper-specific frame carries that key wrapped for whoever may read
//! it back.

use std::fmt;

use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;
use anyhow::anyhow;

use cask_store::Result;

/// AES-256-GCM with the 16-byte IV the frame formats carry.
type PayloadCipher = AesGcm<Aes256, U16>;

/// Total key-material length: 32-byte key + 16-byte IV.
pub(crate) const DATA_KEY_LEN: usize = 48;
/// AES-256 key length within the blob.
const KEY_LEN: usize = 32;
/// GCM authentication tag length.
pub(crate) const TAG_LEN: usize = 16;
/// Length of a data key sealed under another key: 48 bytes + tag.
pub(crate) const SEALED_KEY_LEN: usize = DATA_KEY_LEN + TAG_LEN;

/// A 48-byte AES-256-GCM key+IV blob.
#[derive(Clone)]
pub(crate) struct DataKey([u8; DATA_KEY_LEN]);

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DataKey(..)")
    }
}

impl From<[u8; DATA_KEY_LEN]> for DataKey {
    fn from(bytes: [u8; DATA_KEY_LEN]) -> Self {
        DataKey(bytes)
    }
}

impl DataKey {
    /// Generate a fresh random data key.
    pub fn generate() -> Result<Self> {
        let mut buf = [0; DATA_KEY_LEN];
        getrandom::getrandom(&mut buf)
            .map_err(|e| anyhow!("failed to generate data key: {}", e))?;
        Ok(DataKey(buf))
    }

    /// Rebuild a data key from unwrapped key material.
    pub fn from_slice(data: &[u8]) -> Option<Self> {
        let bytes: [u8; DATA_KEY_LEN] = data.try_into().ok()?;
        Some(DataKey(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    fn cipher(&self) -> PayloadCipher {
        PayloadCipher::new(GenericArray::from_slice(&self.0[..KEY_LEN]))
    }

    fn iv(&self) -> &GenericArray<u8, U16> {
        GenericArray::from_slice(&self.0[KEY_LEN..])
    }

    /// Encrypt; output is `ciphertext ∥ tag(16)`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.cipher()
            .encrypt(self.iv(), plaintext)
            .map_err(|_| anyhow!("encrypt error").into())
    }

    /// Decrypt `ciphertext ∥ tag(16)`; `None` on authentication failure.
    pub fn open(&self, sealed: &[u8]) -> Option<Vec<u8>> {
        self.cipher().decrypt(self.iv(), sealed).ok()
    }
}
