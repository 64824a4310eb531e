//! Key material and HKDF derivation.
//!
//! Every device ships with a pre-shared local key. Nothing is ever keyed
//! with it directly: the handshake and session keys are derived from it.

use std::fmt;

use base64::Engine;
use hkdf::Hkdf;
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::MIN_LOCAL_KEY_SIZE;

/// Errors from key handling
#[derive(Debug, Error)]
pub enum KeyError {
    /// Key material is empty
    #[error("Key material is empty")]
    Empty,

    /// Key material is shorter than required
    #[error("Key too short: {len} bytes (need {min})")]
    TooShort {
        /// Actual length
        len: usize,
        /// Required length
        min: usize,
    },

    /// Key encoding could not be decoded
    #[error("Invalid key encoding: {0}")]
    InvalidEncoding(String),

    /// HKDF expansion failed (requested output too long)
    #[error("Key derivation failed: {0}")]
    DerivationFailed(String),
}

/// Secret key bytes, zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    /// Create new key material from bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Key material from a device local key as printed by the vendor app.
    ///
    /// Local keys are ASCII strings; their raw bytes are the secret.
    pub fn from_local_key(local_key: &str) -> Result<Self, KeyError> {
        let trimmed = local_key.trim();
        if trimmed.is_empty() {
            return Err(KeyError::Empty);
        }
        if trimmed.len() < MIN_LOCAL_KEY_SIZE {
            return Err(KeyError::TooShort {
                len: trimmed.len(),
                min: MIN_LOCAL_KEY_SIZE,
            });
        }
        Ok(Self::new(trimmed.as_bytes().to_vec()))
    }

    /// Key material from standard base64
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
        if bytes.is_empty() {
            return Err(KeyError::Empty);
        }
        Ok(Self::new(bytes))
    }

    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Get the key length
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the key is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Derive a new key using HKDF-SHA256 without salt
    pub fn derive(&self, info: &[u8], output_len: usize) -> Result<KeyMaterial, KeyError> {
        self.derive_with_salt(None, info, output_len)
    }

    /// Derive a new key using HKDF-SHA256 (extract with `salt`, then expand)
    pub fn derive_with_salt(
        &self,
        salt: Option<&[u8]>,
        info: &[u8],
        output_len: usize,
    ) -> Result<KeyMaterial, KeyError> {
        let hk = Hkdf::<Sha256>::new(salt, &self.bytes);
        let mut okm = vec![0u8; output_len];

        hk.expand(info, &mut okm)
            .map_err(|e| KeyError::DerivationFailed(format!("HKDF expand failed: {e}")))?;

        Ok(KeyMaterial::new(okm))
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED, {} bytes])", self.bytes.len())
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        constant_time_eq(&self.bytes, &other.bytes)
    }
}

impl Eq for KeyMaterial {}

/// Constant-time comparison
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_local_key_accepts_vendor_format() {
        let key = KeyMaterial::from_local_key("  aB3dE5gH7jK9mN1p \n").unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(key.as_bytes(), b"aB3dE5gH7jK9mN1p");
    }

    #[test]
    fn test_local_key_rejects_short_and_empty() {
        assert!(matches!(
            KeyMaterial::from_local_key("short"),
            Err(KeyError::TooShort { len: 5, .. })
        ));
        assert!(matches!(
            KeyMaterial::from_local_key("   "),
            Err(KeyError::Empty)
        ));
    }

    #[test]
    fn test_key_material_debug_redacted() {
        let key = KeyMaterial::new(vec![0x42; 32]);
        let debug = format!("{key:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("42"));
    }

    #[test]
    fn test_base64_key() {
        let key = KeyMaterial::from_base64("AAECAwQFBgcICQoLDA0ODw==").unwrap();
        assert_eq!(key.as_bytes(), &hex!("000102030405060708090a0b0c0d0e0f"));
        assert!(KeyMaterial::from_base64("***").is_err());
    }

    #[test]
    fn test_derive_is_deterministic_and_info_bound() {
        let key = KeyMaterial::new(b"0123456789abcdef".to_vec());
        let a = key.derive(b"robovac/test/a", 32).unwrap();
        let b = key.derive(b"robovac/test/a", 32).unwrap();
        let c = key.derive(b"robovac/test/b", 32).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    /// RFC 5869 Appendix A.1
    #[test]
    fn test_rfc5869_case1_sha256() {
        let ikm = KeyMaterial::new(hex!("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b").to_vec());
        let salt = hex!("000102030405060708090a0b0c");
        let info = hex!("f0f1f2f3f4f5f6f7f8f9");
        let expected = hex!(
            "3cb25f25faacd57a90434f64d0362f2a"
            "2d2d0a90cf1a5a4c5db02d56ecc4c5bf"
            "34007208d5b887185865"
        );

        let okm = ikm.derive_with_salt(Some(&salt), &info, 42).unwrap();
        assert_eq!(okm.as_bytes(), &expected);
    }

    #[test]
    fn test_derive_rejects_oversized_output() {
        let key = KeyMaterial::new(vec![1; 32]);
        assert!(key.derive(b"x", 255 * 32 + 1).is_err());
    }
}
