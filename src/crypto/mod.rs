//! Authenticated encryption for opaque session payloads.
//!
//! This module provides the cipher box used to seal session state before it is
//! handed to the browser. It uses AES-256-GCM with a fixed process-wide key.
//!
//! The sealed format is: nonce || ciphertext || tag
//! where nonce is 12 bytes, and tag is 16 bytes (AES-GCM authentication tag).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use thiserror::Error;

/// The length of the AES-256 key in bytes
pub const KEY_LENGTH: usize = 32;

/// The length of the AES-GCM nonce in bytes
const NONCE_LENGTH: usize = 12;

/// The length of the AES-GCM authentication tag in bytes
const TAG_LENGTH: usize = 16;

/// Errors raised while building a cipher box from configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CipherKeyError {
    #[error("cipher key is not valid hex")]
    InvalidHex,

    #[error("cipher key must be {expected} bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
}

/// Sealing failed. Only happens for inputs AES-GCM refuses to encrypt.
#[derive(Error, Debug)]
#[error("failed to seal payload")]
pub struct SealError;

/// Opening failed. Tampering, truncation and a wrong key are deliberately
/// indistinguishable.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("authentication failed")]
pub struct AuthenticationError;

/// Symmetric authenticated encryption with a key fixed at startup.
#[derive(Clone)]
pub struct CipherBox {
    cipher: Aes256Gcm,
}

impl CipherBox {
    /// Build a cipher box from raw key bytes.
    pub fn new(key: &[u8; KEY_LENGTH]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Build a cipher box from a hex-encoded key.
    ///
    /// Generate one with: `openssl rand -hex 32`
    pub fn from_hex_key(hex_key: &str) -> Result<Self, CipherKeyError> {
        let bytes = hex::decode(hex_key.trim()).map_err(|_| CipherKeyError::InvalidHex)?;
        let key: [u8; KEY_LENGTH] =
            bytes
                .as_slice()
                .try_into()
                .map_err(|_| CipherKeyError::WrongLength {
                    expected: KEY_LENGTH,
                    actual: bytes.len(),
                })?;
        Ok(Self::new(&key))
    }

    /// Encrypt and authenticate `plaintext` under a fresh random nonce.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SealError> {
        use rand::RngCore;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| SealError)?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Verify and decrypt a payload produced by [`CipherBox::seal`].
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, AuthenticationError> {
        if sealed.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(AuthenticationError);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LENGTH);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| AuthenticationError)
    }
}

impl std::fmt::Debug for CipherBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CipherBox([redacted])")
    }
}
