//! ChaCha20-Poly1305 AEAD for session frames.
//!
//! Output layout is `nonce(12) || ciphertext || tag(16)`. The frame header
//! is passed as associated data so header tampering fails decryption.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use thiserror::Error;

use super::keys::KeyMaterial;
use super::{AEAD_TAG_SIZE, NONCE_SIZE, SESSION_KEY_SIZE};

/// Errors from AEAD operations
#[derive(Debug, Error)]
pub enum AeadError {
    /// Invalid key
    #[error("Invalid AEAD key: {0}")]
    InvalidKey(String),

    /// Encryption failed
    #[error("Encryption failed")]
    EncryptionFailed,

    /// Decryption failed (auth tag mismatch or corrupted data)
    #[error("Decryption failed")]
    DecryptionFailed,

    /// Data too short
    #[error("Ciphertext too short")]
    DataTooShort,
}

/// ChaCha20-Poly1305 cipher bound to one session key
pub struct AeadCipher {
    cipher: ChaCha20Poly1305,
}

impl AeadCipher {
    /// Create a new AEAD cipher. The key must be exactly 32 bytes.
    pub fn new(key: &KeyMaterial) -> Result<Self, AeadError> {
        if key.len() != SESSION_KEY_SIZE {
            return Err(AeadError::InvalidKey(format!(
                "expected {} bytes, got {}",
                SESSION_KEY_SIZE,
                key.len()
            )));
        }
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        Ok(Self { cipher })
    }

    /// Size of the sealed output for a plaintext of `len` bytes
    pub const fn sealed_len(len: usize) -> usize {
        NONCE_SIZE + len + AEAD_TAG_SIZE
    }

    /// Encrypt with an explicit nonce
    pub fn encrypt_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, AeadError> {
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| AeadError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Encrypt with a fresh random nonce from the system CSPRNG
    pub fn encrypt(&self, plaintext: &[u8], associated_data: &[u8]) -> Result<Vec<u8>, AeadError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        self.encrypt_with_nonce(plaintext, &nonce, associated_data)
    }

    /// Decrypt `nonce || ciphertext || tag`
    pub fn decrypt(&self, sealed: &[u8], associated_data: &[u8]) -> Result<Vec<u8>, AeadError> {
        if sealed.len() < NONCE_SIZE + AEAD_TAG_SIZE {
            return Err(AeadError::DataTooShort);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

        self.cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| AeadError::DecryptionFailed)
    }
}

impl std::fmt::Debug for AeadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AeadCipher([REDACTED])")
    }
}
